// Per-notebook supervision state machine: stopped -> starting -> started -> stopped

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;

use crate::kernel::{KernelProcessInfo, KernelStatus};
use crate::sampler::{KernelReading, SamplerHandle, SamplerLauncher, SharedReading};
use crate::workspace::NotebookDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Started,
}

/// What the supervisor should do after a kernel status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    None,
    Stopped,
    Start,
}

/// Supervises the sampler of one notebook's kernel.
///
/// Attach attempts are asynchronous: [`KernelMonitor::begin_start`] hands out an attempt id,
/// the caller resolves the kernel's process identity elsewhere and reports back through
/// [`KernelMonitor::complete_start`]. Only one current attempt is in flight at a time. An attempt
/// overtaken by [`KernelMonitor::stop`] goes stale: a new one may begin right away, and the stale
/// one is discarded on completion.
pub struct KernelMonitor {
    subject: String,
    notebook: Weak<NotebookDocument>,
    state: MonitorState,
    sampler: Option<SamplerHandle>,
    pid: Option<u32>,
    reading: SharedReading,
    generation: u64,
    in_flight: Option<u64>,
    retry_requested: bool,
    kernel_watches: HashMap<String, JoinHandle<()>>,
}

impl KernelMonitor {
    pub fn new(notebook: &Arc<NotebookDocument>) -> Self {
        Self {
            subject: notebook.path.clone(),
            notebook: Arc::downgrade(notebook),
            state: MonitorState::Stopped,
            sampler: None,
            pid: None,
            reading: Arc::new(Mutex::new(KernelReading::default())),
            generation: 0,
            in_flight: None,
            retry_requested: false,
            kernel_watches: HashMap::new(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// The notebook, if it is still open.
    pub fn notebook(&self) -> Option<Arc<NotebookDocument>> {
        self.notebook.upgrade()
    }

    pub fn kernel_pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether an attempt for the current kernel process is still running. Stale attempts do not
    /// count.
    pub fn is_start_in_flight(&self) -> bool {
        self.in_flight == Some(self.generation)
    }

    /// Last kernel reading reported by the sampler.
    pub fn last_reading(&self) -> KernelReading {
        self.reading.lock().map(|r| *r).unwrap_or_default()
    }

    /// Claims a new attach attempt, superseding a stale one. Returns `None` when already started,
    /// when a current attempt is in flight, or when the notebook is gone.
    pub fn begin_start(&mut self) -> Option<u64> {
        if self.state == MonitorState::Started || self.is_start_in_flight() {
            return None;
        }
        self.notebook.upgrade()?;
        self.in_flight = Some(self.generation);
        self.state = MonitorState::Starting;
        Some(self.generation)
    }

    /// Whether `attempt` is the in-flight attempt for the current kernel process.
    pub fn is_current_attempt(&self, attempt: u64) -> bool {
        self.in_flight == Some(attempt) && attempt == self.generation
    }

    /// Asks for the 1s/5s re-attempts once the current or next attempt ends without a sampler.
    pub fn request_retry(&mut self) {
        self.retry_requested = true;
    }

    /// Finishes attempt `attempt` with the discovered process identity (`None` when the kernel
    /// is missing, not Python, or did not answer). Returns whether retries were requested and
    /// are now due.
    pub fn complete_start(
        &mut self,
        attempt: u64,
        process: Option<KernelProcessInfo>,
        launcher: &dyn SamplerLauncher,
    ) -> bool {
        if self.in_flight != Some(attempt) {
            return false;
        }
        self.in_flight = None;
        if attempt == self.generation {
            self.finish_attach(process, launcher);
        }
        let retry_due = self.retry_requested && self.state != MonitorState::Started;
        self.retry_requested = false;
        retry_due
    }

    fn finish_attach(&mut self, process: Option<KernelProcessInfo>, launcher: &dyn SamplerLauncher) {
        let Some(process) = process else {
            self.state = MonitorState::Stopped;
            return;
        };
        let attached = self.sampler.as_ref().is_some_and(SamplerHandle::is_attached);
        if attached && self.pid == Some(process.pid) {
            self.state = MonitorState::Started;
            return;
        }
        match launcher.attach(&self.subject, &process, self.reading.clone()) {
            Ok(handle) => {
                if let Some(mut previous) = self.sampler.replace(handle) {
                    previous.detach();
                }
                self.pid = Some(process.pid);
                self.state = MonitorState::Started;
            }
            Err(e) => {
                tracing::warn!(error = %e, notebook = %self.subject, "sampler attach failed");
                self.state = MonitorState::Stopped;
            }
        }
    }

    /// Applies a kernel status change.
    pub fn on_kernel_status(&mut self, status: KernelStatus) -> StatusAction {
        if status.invalidates_process() {
            self.stop();
            return StatusAction::Stopped;
        }
        if status.is_ready() && self.state == MonitorState::Stopped && !self.is_start_in_flight() {
            return StatusAction::Start;
        }
        StatusAction::None
    }

    /// Kills the sampler and forgets the kernel pid. Any attempt in flight goes stale and is
    /// discarded when it completes.
    pub fn stop(&mut self) {
        if let Some(mut sampler) = self.sampler.take() {
            sampler.detach();
        }
        self.pid = None;
        self.generation += 1;
        self.state = MonitorState::Stopped;
    }

    pub fn is_watching_kernel(&self, kernel_id: &str) -> bool {
        self.kernel_watches.contains_key(kernel_id)
    }

    /// Keeps the task forwarding `kernel_id`'s status changes; it is aborted on dispose.
    pub fn watch_kernel(&mut self, kernel_id: String, watch: JoinHandle<()>) {
        if let Some(previous) = self.kernel_watches.insert(kernel_id, watch) {
            previous.abort();
        }
    }

    /// The notebook now runs a different kernel: stop sampling the old one and drop its status
    /// listeners.
    pub fn kernel_replaced(&mut self) {
        self.stop();
        self.release_watches();
    }

    /// Stops sampling and releases every status listener.
    pub fn dispose(&mut self) {
        self.stop();
        self.release_watches();
    }

    fn release_watches(&mut self) {
        for (_, watch) in self.kernel_watches.drain() {
            watch.abort();
        }
    }
}

impl Drop for KernelMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}
