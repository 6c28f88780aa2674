// Supervisor actor: monitor registry, settings snapshot, UI clients and the 1s broadcast tick

pub mod monitor;
pub mod scheduler;

pub use monitor::{KernelMonitor, MonitorState, StatusAction};
pub use scheduler::{MonitoredSubject, TICK_INTERVAL, TickScheduler};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, interval};
use tracing::Instrument;

use crate::host_info::HostInfoSource;
use crate::kernel::{Kernel, KernelProcessInfo, KernelRuntime, KernelStatus};
use crate::kernel::{get_kernel_process_info, get_python_kernel};
use crate::models::{
    FromClientMessage, MetricKey, MetricKind, Sample, Settings, ToClientMessage, now_ms,
};
use crate::sampler::SamplerLauncher;
use crate::state_store::{SHOW_CPU_KEY, SHOW_MEMORY_KEY, WorkspaceState};
use crate::workspace::{HostEvent, NotebookDocument};

pub type ClientId = u64;

/// Collaborators, queues and shutdown for the supervisor.
pub struct SupervisorDeps {
    pub runtime: Arc<dyn KernelRuntime>,
    pub launcher: Arc<dyn SamplerLauncher>,
    pub host: Arc<dyn HostInfoSource>,
    /// Shared queue every sampler feeds; drained once per tick.
    pub samples_rx: mpsc::UnboundedReceiver<Sample>,
    /// Where `showCPU`/`showMemory` are persisted. `None` keeps them in memory only.
    pub state: Option<Arc<WorkspaceState>>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Supervisor timing and queue config.
pub struct SupervisorConfig {
    pub initial_settings: Settings,
    /// Re-attempt delays after a document change that did not reach `started`.
    pub retry_delays: Vec<Duration>,
    pub introspection_timeout: Duration,
    pub stats_log_interval: Duration,
    pub client_queue_capacity: usize,
}

/// Snapshot of one monitor, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSummary {
    pub notebook: String,
    pub state: MonitorState,
    pub kernel_pid: Option<u32>,
}

enum Command {
    RegisterClient {
        visible: bool,
        headless: bool,
        reply: oneshot::Sender<(ClientId, mpsc::Receiver<ToClientMessage>)>,
    },
    UnregisterClient {
        id: ClientId,
    },
    ClientMessage {
        id: ClientId,
        message: FromClientMessage,
    },
    Host(HostEvent),
    GetSettings {
        reply: oneshot::Sender<Settings>,
    },
    GetMonitors {
        reply: oneshot::Sender<Vec<MonitorSummary>>,
    },
    AttachAttempted {
        notebook: String,
        attempt: u64,
        kernel: Option<Arc<dyn Kernel>>,
        process: Option<KernelProcessInfo>,
    },
    KernelStatus {
        notebook: String,
        status: KernelStatus,
    },
    Retry {
        notebook: String,
    },
}

/// Cloneable entry point into the supervisor task. Every call is a message; none blocks on the
/// supervisor except the ones returning a reply.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl SupervisorHandle {
    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            tracing::debug!("supervisor is gone; dropping command");
        }
    }

    /// Registers a UI context and returns its id and message queue. `None` once the supervisor
    /// has stopped.
    pub async fn register_client(
        &self,
        visible: bool,
    ) -> Option<(ClientId, mpsc::Receiver<ToClientMessage>)> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterClient {
            visible,
            headless: false,
            reply,
        });
        rx.await.ok()
    }

    /// Registers a context nobody looks at directly, such as the server-side preview. It receives
    /// every broadcast but never keeps sampling alive or triggers tracking on its own.
    pub async fn register_headless_client(
        &self,
    ) -> Option<(ClientId, mpsc::Receiver<ToClientMessage>)> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::RegisterClient {
            visible: false,
            headless: true,
            reply,
        });
        rx.await.ok()
    }

    pub fn unregister_client(&self, id: ClientId) {
        self.send(Command::UnregisterClient { id });
    }

    pub fn client_message(&self, id: ClientId, message: FromClientMessage) {
        self.send(Command::ClientMessage { id, message });
    }

    pub fn host_event(&self, event: HostEvent) {
        self.send(Command::Host(event));
    }

    pub fn toggle(&self, kind: MetricKind) {
        self.host_event(match kind {
            MetricKind::Cpu => HostEvent::ToggleCpu,
            MetricKind::Memory => HostEvent::ToggleMemory,
        });
    }

    pub async fn settings(&self) -> Option<Settings> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetSettings { reply });
        rx.await.ok()
    }

    pub async fn monitors(&self) -> Vec<MonitorSummary> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetMonitors { reply });
        rx.await.unwrap_or_default()
    }
}

struct Client {
    tx: mpsc::Sender<ToClientMessage>,
    visible: bool,
    headless: bool,
}

struct Supervisor {
    runtime: Arc<dyn KernelRuntime>,
    launcher: Arc<dyn SamplerLauncher>,
    host: Arc<dyn HostInfoSource>,
    state: Option<Arc<WorkspaceState>>,
    commands: mpsc::WeakUnboundedSender<Command>,
    retry_delays: Vec<Duration>,
    introspection_timeout: Duration,
    client_queue_capacity: usize,

    settings: Settings,
    /// Lane keys hidden by a toggle, restored when the lane is shown again.
    stash: HashMap<MetricKind, Vec<MetricKey>>,
    notebooks: HashMap<String, Arc<NotebookDocument>>,
    active: Option<String>,
    monitors: HashMap<String, KernelMonitor>,
    clients: HashMap<ClientId, Client>,
    next_client: ClientId,
    scheduler: TickScheduler,
    samples_rx: mpsc::UnboundedReceiver<Sample>,
}

/// Spawns the supervisor task. It runs until shutdown fires or every handle is dropped, then
/// stops all samplers.
pub fn spawn(
    deps: SupervisorDeps,
    config: SupervisorConfig,
) -> (SupervisorHandle, tokio::task::JoinHandle<()>) {
    let SupervisorDeps {
        runtime,
        launcher,
        host,
        samples_rx,
        state,
        mut shutdown_rx,
    } = deps;
    let SupervisorConfig {
        initial_settings,
        retry_delays,
        introspection_timeout,
        stats_log_interval,
        client_queue_capacity,
    } = config;

    let (tx, mut commands_rx) = mpsc::unbounded_channel();
    let mut settings = initial_settings;
    // Keys of lanes that start hidden wait in the stash until their toggle turns them on.
    let mut stash: HashMap<MetricKind, Vec<MetricKey>> = HashMap::new();
    let (shown, hidden): (Vec<MetricKey>, Vec<MetricKey>) =
        std::mem::take(&mut settings.enabled_metrics)
            .into_iter()
            .partition(|k| settings.shows(k.kind));
    settings.enabled_metrics = shown;
    for key in hidden {
        stash.entry(key.kind).or_default().push(key);
    }
    let mut supervisor = Supervisor {
        runtime,
        launcher,
        host,
        state,
        commands: tx.downgrade(),
        retry_delays,
        introspection_timeout,
        client_queue_capacity: client_queue_capacity.max(1),
        settings,
        stash,
        notebooks: HashMap::new(),
        active: None,
        monitors: HashMap::new(),
        clients: HashMap::new(),
        next_client: 1,
        scheduler: TickScheduler::new(),
        samples_rx,
    };

    let span = tracing::span!(tracing::Level::DEBUG, "supervisor");
    let handle = tokio::spawn(
        async move {
            let mut tick = interval(TICK_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut stats_log_tick = interval(stats_log_interval);
            stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tick.tick() => supervisor.on_tick(),
                    command = commands_rx.recv() => match command {
                        Some(command) => supervisor.handle(command),
                        None => break,
                    },
                    _ = stats_log_tick.tick() => {
                        tracing::info!(
                            ui_clients = supervisor.clients.len(),
                            visible_clients = supervisor.visible_clients(),
                            monitors = supervisor.monitors.len(),
                            monitoring_notebooks = supervisor.settings.monitoring_notebooks.len(),
                            "app stats"
                        );
                    }
                    _ = &mut shutdown_rx => {
                        tracing::debug!("Supervisor shutting down");
                        break;
                    }
                }
            }
            supervisor.dispose();
        }
        .instrument(span),
    );
    (SupervisorHandle { tx }, handle)
}

impl Supervisor {
    fn handle(&mut self, command: Command) {
        match command {
            Command::RegisterClient {
                visible,
                headless,
                reply,
            } => {
                let registered = self.register_client(visible, headless);
                if reply.send(registered).is_err() {
                    tracing::debug!("client went away during registration");
                }
                if visible {
                    self.hydrate();
                }
            }
            Command::UnregisterClient { id } => {
                if self.clients.remove(&id).is_some() {
                    tracing::debug!(client = id, "UI client unregistered");
                    self.pause_if_hidden();
                }
            }
            Command::ClientMessage { id, message } => self.on_client_message(id, message),
            Command::Host(event) => self.on_host_event(event),
            Command::GetSettings { reply } => {
                let _ = reply.send(self.settings.clone());
            }
            Command::GetMonitors { reply } => {
                let mut summaries: Vec<MonitorSummary> = self
                    .monitors
                    .values()
                    .map(|m| MonitorSummary {
                        notebook: m.subject().to_string(),
                        state: m.state(),
                        kernel_pid: m.kernel_pid(),
                    })
                    .collect();
                summaries.sort_by(|a, b| a.notebook.cmp(&b.notebook));
                let _ = reply.send(summaries);
            }
            Command::AttachAttempted {
                notebook,
                attempt,
                kernel,
                process,
            } => self.on_attach_attempted(notebook, attempt, kernel, process),
            Command::KernelStatus { notebook, status } => {
                let Some(monitor) = self.monitors.get_mut(&notebook) else {
                    return;
                };
                tracing::debug!(notebook = %notebook, ?status, "kernel status");
                if monitor.on_kernel_status(status) == StatusAction::Start {
                    self.start_monitor(&notebook);
                }
            }
            Command::Retry { notebook } => self.start_monitor(&notebook),
        }
    }

    fn register_client(
        &mut self,
        visible: bool,
        headless: bool,
    ) -> (ClientId, mpsc::Receiver<ToClientMessage>) {
        let id = self.next_client;
        self.next_client += 1;
        let (tx, rx) = mpsc::channel(self.client_queue_capacity);
        let settings = ToClientMessage::UpdateSettings {
            settings: self.settings.clone(),
        };
        if tx.try_send(settings).is_err() {
            tracing::debug!(client = id, "initial settings not delivered");
        }
        self.clients.insert(
            id,
            Client {
                tx,
                visible,
                headless,
            },
        );
        tracing::debug!(client = id, visible, headless, "UI client registered");
        (id, rx)
    }

    /// Visible clients backed by a real view; headless ones never count.
    fn visible_clients(&self) -> usize {
        self.clients
            .values()
            .filter(|c| c.visible && !c.headless)
            .count()
    }

    fn has_viewers(&self) -> bool {
        self.clients.values().any(|c| !c.headless)
    }

    fn on_client_message(&mut self, id: ClientId, message: FromClientMessage) {
        match message {
            FromClientMessage::SetEnabledMetrics { keys } => self.set_enabled_metrics(keys),
            FromClientMessage::SetVisibility { visible } => {
                let Some(client) = self.clients.get_mut(&id) else {
                    return;
                };
                if client.visible == visible {
                    return;
                }
                client.visible = visible;
                if visible {
                    self.hydrate();
                } else {
                    self.pause_if_hidden();
                }
            }
            FromClientMessage::SwitchGraph { .. } => {}
        }
    }

    fn on_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::NotebookOpened(document) => {
                let path = document.path.clone();
                self.notebooks.insert(path.clone(), Arc::new(document));
                self.start_tracking(&path);
            }
            HostEvent::NotebookClosed(path) => {
                self.stop_tracking(&path);
                self.notebooks.remove(&path);
                if self.active.as_deref() == Some(path.as_str()) {
                    self.active = None;
                }
            }
            HostEvent::NotebookChanged(path) => {
                let Some(monitor) = self.monitors.get_mut(&path) else {
                    return;
                };
                if monitor.state() == MonitorState::Started {
                    return;
                }
                monitor.request_retry();
                self.start_monitor(&path);
            }
            HostEvent::ActiveNotebookChanged(path) => {
                self.active = path.clone();
                if let Some(path) = path {
                    self.start_tracking(&path);
                }
            }
            HostEvent::KernelChanged(path) => {
                let Some(monitor) = self.monitors.get_mut(&path) else {
                    return;
                };
                tracing::debug!(notebook = %path, "kernel changed");
                monitor.kernel_replaced();
                monitor.request_retry();
                self.start_monitor(&path);
            }
            HostEvent::ToggleCpu => self.toggle(MetricKind::Cpu),
            HostEvent::ToggleMemory => self.toggle(MetricKind::Memory),
        }
    }

    /// Creates the notebook's monitor if needed and starts it. Only Jupyter notebooks are
    /// tracked, and only while some UI client exists.
    fn start_tracking(&mut self, path: &str) {
        if !self.has_viewers() {
            return;
        }
        let Some(document) = self.notebooks.get(path) else {
            return;
        };
        if !document.is_jupyter() {
            return;
        }
        if !self.monitors.contains_key(path) {
            tracing::debug!(notebook = %path, "tracking notebook");
            self.monitors
                .insert(path.to_string(), KernelMonitor::new(document));
        }
        self.start_monitor(path);
    }

    fn stop_tracking(&mut self, path: &str) {
        if let Some(mut monitor) = self.monitors.remove(path) {
            monitor.dispose();
            tracing::debug!(notebook = %path, "stopped tracking notebook");
        }
        if !self.settings.is_monitoring(path) {
            return;
        }
        self.settings.monitoring_notebooks.retain(|n| n != path);
        self.settings.enabled_metrics.retain(|k| k.notebook != path);
        for keys in self.stash.values_mut() {
            keys.retain(|k| k.notebook != path);
        }
        self.broadcast_settings();
    }

    fn stop_tracking_all(&mut self) {
        let mut paths: Vec<String> = self.monitors.keys().cloned().collect();
        for path in &self.settings.monitoring_notebooks {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        for path in paths {
            self.stop_tracking(&path);
        }
    }

    /// Fresh start for a client that (re)appeared.
    fn hydrate(&mut self) {
        self.stop_tracking_all();
        self.broadcast_settings();
        if let Some(active) = self.active.clone() {
            self.start_tracking(&active);
        }
    }

    /// Sampling only runs while someone is looking.
    fn pause_if_hidden(&mut self) {
        if self.visible_clients() == 0 {
            self.stop_tracking_all();
        }
    }

    /// Kicks off one attach attempt for `path` in its own task.
    fn start_monitor(&mut self, path: &str) {
        let Some(monitor) = self.monitors.get_mut(path) else {
            return;
        };
        let Some(attempt) = monitor.begin_start() else {
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let runtime = self.runtime.clone();
        let timeout = self.introspection_timeout;
        let notebook = path.to_string();
        tracing::debug!(notebook = %notebook, attempt, "attach attempt");
        tokio::spawn(async move {
            let kernel = get_python_kernel(runtime.as_ref(), &notebook).await;
            let process = match &kernel {
                Some(kernel) => get_kernel_process_info(kernel.as_ref(), timeout).await,
                None => None,
            };
            let _ = commands.send(Command::AttachAttempted {
                notebook,
                attempt,
                kernel,
                process,
            });
        });
    }

    fn on_attach_attempted(
        &mut self,
        notebook: String,
        attempt: u64,
        kernel: Option<Arc<dyn Kernel>>,
        process: Option<KernelProcessInfo>,
    ) {
        let Some(monitor) = self.monitors.get_mut(&notebook) else {
            return;
        };
        // Stale attempts may have resolved a kernel that has since been replaced.
        if let Some(kernel) = kernel
            && monitor.is_current_attempt(attempt)
            && !monitor.is_watching_kernel(kernel.id())
        {
            let watch = spawn_status_watch(kernel.as_ref(), notebook.clone(), self.commands.clone());
            monitor.watch_kernel(kernel.id().to_string(), watch);
        }
        let retry_due = monitor.complete_start(attempt, process, self.launcher.as_ref());
        tracing::debug!(notebook = %notebook, state = ?monitor.state(), "attach attempt finished");
        if retry_due {
            self.schedule_retries(&notebook);
        }
    }

    fn schedule_retries(&self, notebook: &str) {
        for delay in &self.retry_delays {
            let commands = self.commands.clone();
            let delay = *delay;
            let notebook = notebook.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(commands) = commands.upgrade() {
                    let _ = commands.send(Command::Retry { notebook });
                }
            });
        }
    }

    fn toggle(&mut self, kind: MetricKind) {
        let show = !self.settings.shows(kind);
        match kind {
            MetricKind::Cpu => self.settings.show_cpu = show,
            MetricKind::Memory => self.settings.show_memory = show,
        }
        if show {
            let stashed = self.stash.remove(&kind).unwrap_or_default();
            for key in stashed {
                let live = key.is_host() || self.settings.is_monitoring(&key.notebook);
                if live && !self.settings.is_enabled(&key) {
                    self.settings.enabled_metrics.push(key);
                }
            }
        } else {
            let (hidden, kept): (Vec<MetricKey>, Vec<MetricKey>) =
                std::mem::take(&mut self.settings.enabled_metrics)
                    .into_iter()
                    .partition(|k| k.kind == kind);
            self.settings.enabled_metrics = kept;
            self.stash.entry(kind).or_default().extend(hidden);
        }
        tracing::info!(kind = kind.as_str(), show, "lane toggled");
        self.persist_flag(kind, show);
        self.broadcast_settings();
    }

    fn persist_flag(&self, kind: MetricKind, value: bool) {
        let Some(state) = self.state.clone() else {
            return;
        };
        let key = match kind {
            MetricKind::Cpu => SHOW_CPU_KEY,
            MetricKind::Memory => SHOW_MEMORY_KEY,
        };
        tokio::spawn(async move {
            if let Err(e) = state.set_bool(key, value).await {
                tracing::warn!(error = %e, operation = "set_bool", key, "failed to persist flag");
            }
        });
    }

    fn set_enabled_metrics(&mut self, keys: Vec<MetricKey>) {
        let mut enabled: Vec<MetricKey> = Vec::with_capacity(keys.len());
        for key in keys {
            if enabled.contains(&key) {
                continue;
            }
            if self.settings.shows(key.kind) {
                enabled.push(key);
            } else {
                let stash = self.stash.entry(key.kind).or_default();
                if !stash.contains(&key) {
                    stash.push(key);
                }
            }
        }
        self.settings.enabled_metrics = enabled;
        self.broadcast_settings();
    }

    /// A started monitor produced data for a notebook the chart does not show yet.
    fn note_monitoring(&mut self, notebook: &str) -> bool {
        if notebook.is_empty() || self.settings.is_monitoring(notebook) {
            return false;
        }
        let started = self
            .monitors
            .get(notebook)
            .is_some_and(|m| m.state() == MonitorState::Started);
        if !started {
            return false;
        }
        self.settings.monitoring_notebooks.push(notebook.to_string());
        self.settings.enabled_metrics.retain(|k| k.notebook != notebook);
        for kind in MetricKind::ALL {
            let key = MetricKey::new(kind, notebook);
            if self.settings.shows(kind) {
                self.settings.enabled_metrics.push(key);
            } else {
                self.stash.entry(kind).or_default().push(key);
            }
        }
        tracing::info!(notebook = %notebook, "monitoring notebook");
        true
    }

    fn on_tick(&mut self) {
        let mut batch = Vec::new();
        while let Ok(sample) = self.samples_rx.try_recv() {
            batch.push(sample);
        }

        let mut settings_changed = false;
        for sample in &batch {
            settings_changed |= self.note_monitoring(&sample.notebook);
        }
        if settings_changed {
            self.broadcast_settings();
        }

        let monitored: Vec<MonitoredSubject> = self
            .settings
            .monitoring_notebooks
            .iter()
            .filter_map(|notebook| {
                let monitor = self.monitors.get(notebook)?;
                Some(MonitoredSubject {
                    notebook: notebook.clone(),
                    reading: monitor.last_reading(),
                })
            })
            .collect();
        let host = self.host.snapshot();
        let any_supervised = !self.monitors.is_empty();
        if let Some(data) = self
            .scheduler
            .tick(now_ms(), batch, any_supervised, &monitored, &host)
        {
            self.broadcast(ToClientMessage::BatchAddData { data });
        }
    }

    fn broadcast_settings(&mut self) {
        self.broadcast(ToClientMessage::UpdateSettings {
            settings: self.settings.clone(),
        });
    }

    /// Sends to every visible or headless client. Full queues drop the message; closed ones are
    /// removed.
    fn broadcast(&mut self, message: ToClientMessage) {
        let mut closed = Vec::new();
        for (id, client) in &self.clients {
            if !client.visible && !client.headless {
                continue;
            }
            match client.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(client = id, "UI client queue full; dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        if closed.is_empty() {
            return;
        }
        for id in closed {
            self.clients.remove(&id);
            tracing::debug!(client = id, "UI client queue closed");
        }
        self.pause_if_hidden();
    }

    fn dispose(&mut self) {
        for (_, mut monitor) in self.monitors.drain() {
            monitor.dispose();
        }
        self.clients.clear();
    }
}

/// Forwards a kernel's status changes to the supervisor until the kernel or supervisor goes.
fn spawn_status_watch(
    kernel: &dyn Kernel,
    notebook: String,
    commands: mpsc::WeakUnboundedSender<Command>,
) -> tokio::task::JoinHandle<()> {
    let mut statuses = kernel.subscribe_status();
    tokio::spawn(async move {
        loop {
            let status = match statuses.recv().await {
                Ok(status) => status,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(notebook = %notebook, skipped, "kernel status lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let Some(commands) = commands.upgrade() else {
                break;
            };
            if commands
                .send(Command::KernelStatus {
                    notebook: notebook.clone(),
                    status,
                })
                .is_err()
            {
                break;
            }
        }
    })
}
