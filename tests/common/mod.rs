// Shared test helpers: fake kernel runtime, sampler launcher and host source
#![allow(dead_code)]

use async_trait::async_trait;
use kernelmon::host_info::{HostInfoSource, HostSnapshot};
use kernelmon::kernel::{
    Kernel, KernelError, KernelProcessInfo, KernelRuntime, KernelStatus, MONITORING_MIME,
    OutputItem,
};
use kernelmon::models::{CpuReading, MemoryReading, Sample, Settings, ToClientMessage};
use kernelmon::sampler::{AttachError, SamplerHandle, SamplerLauncher, SharedReading};
use kernelmon::supervisor::{
    self, MonitorSummary, SupervisorConfig, SupervisorDeps, SupervisorHandle,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

pub const TEST_CONFIG: &str = r#"
[server]
port = 8081
host = "127.0.0.1"

[monitoring]
host_cpu_refresh_ms = 1000
retry_delays_ms = [1000, 5000]
introspection_timeout_ms = 2000
stats_log_interval_secs = 60

[sampler]
script = "python/sampler.py"

[chart]
view_duration_ms = 30000
poll_interval_ms = 1000

[state]
path = "data/test.db"
workspace = "test"

[publishing]
client_queue_capacity = 32

[preview]
enabled = true
width = 400
height = 300
"#;

pub const NOTEBOOK: &str = "/work/analysis.ipynb";

/// Kernel whose introspection answers with `process` (or nothing when unset).
pub struct FakeKernel {
    id: String,
    language: String,
    process: Mutex<Option<KernelProcessInfo>>,
    pub executions: AtomicUsize,
    status_tx: broadcast::Sender<KernelStatus>,
    hold_next: AtomicBool,
    held: Mutex<Vec<mpsc::Sender<OutputItem>>>,
}

impl FakeKernel {
    pub fn python(id: &str, pid: Option<u32>) -> Arc<Self> {
        Self::with_language(id, "python", pid)
    }

    pub fn with_language(id: &str, language: &str, pid: Option<u32>) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            id: id.to_string(),
            language: language.to_string(),
            process: Mutex::new(pid.map(process_info)),
            executions: AtomicUsize::new(0),
            status_tx,
            hold_next: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
        })
    }

    pub fn set_pid(&self, pid: Option<u32>) {
        *self.process.lock().unwrap() = pid.map(process_info);
    }

    pub fn send_status(&self, status: KernelStatus) {
        let _ = self.status_tx.send(status);
    }

    /// The next execution produces no output and never finishes, like a kernel that went away
    /// mid-request.
    pub fn hold_next_execution(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    pub fn execution_count(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

pub fn process_info(pid: u32) -> KernelProcessInfo {
    KernelProcessInfo {
        executable: "/usr/bin/python3".to_string(),
        env: HashMap::new(),
        pid,
    }
}

#[async_trait]
impl Kernel for FakeKernel {
    fn id(&self) -> &str {
        &self.id
    }

    fn language(&self) -> &str {
        &self.language
    }

    async fn execute_code(&self, _code: &str) -> Result<mpsc::Receiver<OutputItem>, KernelError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(4);
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.held.lock().unwrap().push(tx);
            return Ok(rx);
        }
        let process = self.process.lock().unwrap().clone();
        if let Some(process) = process {
            tx.try_send(OutputItem {
                mime: "text/plain".to_string(),
                data: "noise".to_string(),
            })
            .unwrap();
            tx.try_send(OutputItem {
                mime: MONITORING_MIME.to_string(),
                data: serde_json::to_string(&process).unwrap(),
            })
            .unwrap();
        }
        Ok(rx)
    }

    fn subscribe_status(&self) -> broadcast::Receiver<KernelStatus> {
        self.status_tx.subscribe()
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    kernels: Mutex<HashMap<String, Arc<FakeKernel>>>,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_kernel(&self, path: &str, kernel: Arc<FakeKernel>) {
        self.kernels.lock().unwrap().insert(path.to_string(), kernel);
    }
}

#[async_trait]
impl KernelRuntime for FakeRuntime {
    async fn get_kernel(&self, path: &str) -> Option<Arc<dyn Kernel>> {
        let kernel = self.kernels.lock().unwrap().get(path).cloned()?;
        Some(kernel as Arc<dyn Kernel>)
    }
}

/// One sampler started by [`FakeLauncher`].
pub struct FakeAttach {
    pub subject: String,
    pub pid: u32,
    pub reading: SharedReading,
    kill_rx: oneshot::Receiver<()>,
}

impl FakeAttach {
    /// Whether the supervisor has stopped this sampler.
    pub fn is_killed(&mut self) -> bool {
        !matches!(
            self.kill_rx.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        )
    }
}

#[derive(Default)]
pub struct FakeLauncher {
    pub attaches: Mutex<Vec<FakeAttach>>,
    pub fail: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach_count(&self) -> usize {
        self.attaches.lock().unwrap().len()
    }

    pub fn is_killed(&self, index: usize) -> bool {
        self.attaches.lock().unwrap()[index].is_killed()
    }
}

impl SamplerLauncher for FakeLauncher {
    fn attach(
        &self,
        subject: &str,
        process: &KernelProcessInfo,
        reading: SharedReading,
    ) -> Result<SamplerHandle, AttachError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AttachError::MissingPipe("stdout"));
        }
        let (kill_tx, kill_rx) = oneshot::channel();
        self.attaches.lock().unwrap().push(FakeAttach {
            subject: subject.to_string(),
            pid: process.pid,
            reading,
            kill_rx,
        });
        Ok(SamplerHandle::new(process.pid, kill_tx))
    }
}

/// Host source with fixed readings.
pub struct FixedHost(pub HostSnapshot);

impl FixedHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(HostSnapshot {
            cpu_percent: 25.0,
            total_memory: 16_000_000_000,
            free_memory: 12_000_000_000,
        }))
    }
}

impl HostInfoSource for FixedHost {
    fn snapshot(&self) -> HostSnapshot {
        self.0
    }
}

pub fn kernel_sample(notebook: &str, timestamp: u64, cpu: f64, memory: u64) -> Sample {
    Sample {
        notebook: notebook.to_string(),
        timestamp,
        cpu: Some(CpuReading {
            kernel: cpu,
            system: 0.25,
        }),
        memory: Some(MemoryReading {
            kernel: memory,
            system: 4_000_000_000,
            total: 16_000_000_000,
        }),
    }
}

pub fn host_sample(timestamp: u64, cpu: f64) -> Sample {
    Sample {
        notebook: String::new(),
        timestamp,
        cpu: Some(CpuReading {
            kernel: 0.0,
            system: cpu,
        }),
        memory: Some(MemoryReading {
            kernel: 0,
            system: 4_000_000_000,
            total: 16_000_000_000,
        }),
    }
}

pub struct TestSupervisor {
    pub handle: SupervisorHandle,
    pub task: tokio::task::JoinHandle<()>,
    pub runtime: Arc<FakeRuntime>,
    pub launcher: Arc<FakeLauncher>,
    pub samples_tx: mpsc::UnboundedSender<Sample>,
    pub shutdown_tx: Option<oneshot::Sender<()>>,
}

pub fn spawn_supervisor(
    initial_settings: Settings,
    state: Option<Arc<kernelmon::state_store::WorkspaceState>>,
) -> TestSupervisor {
    let runtime = FakeRuntime::new();
    let launcher = FakeLauncher::new();
    let (samples_tx, samples_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (handle, task) = supervisor::spawn(
        SupervisorDeps {
            runtime: runtime.clone(),
            launcher: launcher.clone(),
            host: FixedHost::new(),
            samples_rx,
            state,
            shutdown_rx,
        },
        SupervisorConfig {
            initial_settings,
            retry_delays: vec![Duration::from_secs(1), Duration::from_secs(5)],
            introspection_timeout: Duration::from_secs(2),
            stats_log_interval: Duration::from_secs(3600),
            client_queue_capacity: 64,
        },
    );
    TestSupervisor {
        handle,
        task,
        runtime,
        launcher,
        samples_tx,
        shutdown_tx: Some(shutdown_tx),
    }
}

/// Polls `check` every 10ms until it holds, failing after ~5s.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

pub async fn wait_for_monitors(
    handle: &SupervisorHandle,
    check: impl Fn(&[MonitorSummary]) -> bool,
) -> Vec<MonitorSummary> {
    for _ in 0..500 {
        let monitors = handle.monitors().await;
        if check(&monitors) {
            return monitors;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("monitors never reached the expected state");
}

pub async fn wait_for_settings(
    handle: &SupervisorHandle,
    check: impl Fn(&Settings) -> bool,
) -> Settings {
    for _ in 0..500 {
        let settings = handle.settings().await.expect("supervisor running");
        if check(&settings) {
            return settings;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("settings never reached the expected state");
}

/// Next message from the client queue, failing after 10s.
pub async fn recv(rx: &mut mpsc::Receiver<ToClientMessage>) -> ToClientMessage {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("message in time")
        .expect("queue open")
}

/// Skips messages until a batch arrives.
pub async fn next_batch(rx: &mut mpsc::Receiver<ToClientMessage>) -> Vec<Sample> {
    loop {
        if let ToClientMessage::BatchAddData { data } = recv(rx).await {
            return data;
        }
    }
}

/// Skips messages until a settings snapshot satisfying `check` arrives.
pub async fn next_settings(
    rx: &mut mpsc::Receiver<ToClientMessage>,
    check: impl Fn(&Settings) -> bool,
) -> Settings {
    loop {
        if let ToClientMessage::UpdateSettings { settings } = recv(rx).await
            && check(&settings)
        {
            return settings;
        }
    }
}
