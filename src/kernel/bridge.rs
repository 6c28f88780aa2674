// Kernel runtime backed by the editor host over the /ws/host bridge

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{broadcast, mpsc};

use super::{Kernel, KernelError, KernelRuntime, KernelStatus, OutputItem};
use crate::models::{FromHostMessage, KernelDescriptor, ToHostMessage};
use crate::workspace::{HostEvent, NotebookDocument};

const STATUS_CHANNEL_CAPACITY: usize = 16;
const OUTPUT_CHANNEL_CAPACITY: usize = 64;

#[derive(Default)]
struct BridgeState {
    connection: u64,
    outbound: Option<mpsc::UnboundedSender<ToHostMessage>>,
    kernels: HashMap<String, Arc<BridgeKernel>>,
    pending: HashMap<u64, PendingExecution>,
}

struct PendingExecution {
    path: String,
    tx: mpsc::Sender<OutputItem>,
}

impl BridgeState {
    /// Ends the executions still waiting on the notebook's kernel; their receivers see the
    /// stream close.
    fn close_pending(&mut self, path: &str) {
        self.pending.retain(|_, pending| pending.path != path);
    }
}

/// Tracks the kernels the host reports and relays code execution to it.
pub struct HostBridge {
    me: Weak<HostBridge>,
    state: Mutex<BridgeState>,
    next_request: AtomicU64,
}

impl HostBridge {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            state: Mutex::new(BridgeState::default()),
            next_request: AtomicU64::new(1),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BridgeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers a new host connection, replacing any previous one. Outstanding executions of the
    /// previous connection end without output.
    pub fn connect(&self) -> (u64, mpsc::UnboundedReceiver<ToHostMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.connection += 1;
        state.outbound = Some(tx);
        state.pending.clear();
        tracing::info!(connection = state.connection, "notebook host connected");
        (state.connection, rx)
    }

    /// Drops the host connection if `connection` is still the current one.
    pub fn disconnect(&self, connection: u64) {
        let mut state = self.lock();
        if state.connection != connection {
            return;
        }
        state.outbound = None;
        state.pending.clear();
        state.kernels.clear();
        tracing::info!(connection, "notebook host disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.lock().outbound.is_some()
    }

    /// Applies a host message. Kernel and execution traffic is absorbed here; notebook events are
    /// returned for the supervisor.
    pub fn handle_message(&self, message: FromHostMessage) -> Option<HostEvent> {
        match message {
            FromHostMessage::NotebookOpened { notebook } => {
                Some(HostEvent::NotebookOpened(NotebookDocument::new(
                    notebook.path,
                    notebook.notebook_type,
                )))
            }
            FromHostMessage::NotebookClosed { path } => {
                let mut state = self.lock();
                state.kernels.remove(&path);
                state.close_pending(&path);
                Some(HostEvent::NotebookClosed(path))
            }
            FromHostMessage::NotebookChanged { path } => Some(HostEvent::NotebookChanged(path)),
            FromHostMessage::ActiveNotebookChanged { path } => {
                Some(HostEvent::ActiveNotebookChanged(path))
            }
            FromHostMessage::KernelChanged { path, kernel } => self
                .set_kernel(&path, kernel)
                .then_some(HostEvent::KernelChanged(path)),
            FromHostMessage::KernelStatus { path, status } => {
                if let Some(kernel) = self.lock().kernels.get(&path) {
                    // No receivers simply means nobody is supervising this notebook yet.
                    let _ = kernel.status_tx.send(status);
                }
                None
            }
            FromHostMessage::ExecuteOutput { request_id, items } => {
                let state = self.lock();
                if let Some(pending) = state.pending.get(&request_id) {
                    for item in items {
                        if pending.tx.try_send(item).is_err() {
                            tracing::debug!(request_id, "dropping execute output");
                        }
                    }
                }
                None
            }
            FromHostMessage::ExecuteDone { request_id } => {
                self.lock().pending.remove(&request_id);
                None
            }
            FromHostMessage::ToggleCpu => Some(HostEvent::ToggleCpu),
            FromHostMessage::ToggleMemory => Some(HostEvent::ToggleMemory),
        }
    }

    /// Binds (or unbinds) the notebook's kernel. Returns whether the binding changed, in which
    /// case executions pending on the previous kernel are closed.
    fn set_kernel(&self, path: &str, kernel: Option<KernelDescriptor>) -> bool {
        let mut state = self.lock();
        let Some(descriptor) = kernel else {
            if state.kernels.remove(path).is_none() {
                return false;
            }
            state.close_pending(path);
            tracing::debug!(notebook = %path, "kernel detached from notebook");
            return true;
        };
        if state
            .kernels
            .get(path)
            .is_some_and(|k| k.id == descriptor.id)
        {
            return false;
        }
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let kernel = Arc::new(BridgeKernel {
            id: descriptor.id,
            language: descriptor.language,
            path: path.to_string(),
            status_tx,
            bridge: self.me.clone(),
        });
        tracing::debug!(notebook = %path, kernel = %kernel.id, "kernel attached to notebook");
        state.close_pending(path);
        state.kernels.insert(path.to_string(), kernel);
        true
    }

    fn execute(
        &self,
        path: &str,
        kernel_id: &str,
        code: &str,
    ) -> Result<mpsc::Receiver<OutputItem>, KernelError> {
        let mut state = self.lock();
        if !state.kernels.get(path).is_some_and(|k| k.id == kernel_id) {
            return Err(KernelError::Gone(path.to_string()));
        }
        let Some(outbound) = state.outbound.clone() else {
            return Err(KernelError::Disconnected);
        };
        let request_id = self.next_request.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        state.pending.insert(
            request_id,
            PendingExecution {
                path: path.to_string(),
                tx,
            },
        );
        let request = ToHostMessage::Execute {
            request_id,
            path: path.to_string(),
            code: code.to_string(),
        };
        if outbound.send(request).is_err() {
            state.pending.remove(&request_id);
            return Err(KernelError::Disconnected);
        }
        Ok(rx)
    }
}

#[async_trait]
impl KernelRuntime for HostBridge {
    async fn get_kernel(&self, path: &str) -> Option<Arc<dyn Kernel>> {
        let kernel = self.lock().kernels.get(path).cloned()?;
        Some(kernel as Arc<dyn Kernel>)
    }
}

/// A kernel as reported by the host.
pub struct BridgeKernel {
    id: String,
    language: String,
    path: String,
    status_tx: broadcast::Sender<KernelStatus>,
    bridge: Weak<HostBridge>,
}

#[async_trait]
impl Kernel for BridgeKernel {
    fn id(&self) -> &str {
        &self.id
    }

    fn language(&self) -> &str {
        &self.language
    }

    async fn execute_code(&self, code: &str) -> Result<mpsc::Receiver<OutputItem>, KernelError> {
        let bridge = self.bridge.upgrade().ok_or(KernelError::Disconnected)?;
        bridge.execute(&self.path, &self.id, code)
    }

    fn subscribe_status(&self) -> broadcast::Receiver<KernelStatus> {
        self.status_tx.subscribe()
    }
}
