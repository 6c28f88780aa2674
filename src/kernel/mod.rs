// Kernel runtime collaborator: resolve a notebook's kernel, run code in it, watch its status

pub mod bridge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// MIME type of the output item carrying the kernel's process identity.
pub const MONITORING_MIME: &str = "application/vnd.jupyter.monitoring+json";

/// Printed by the kernel to report the interpreter, environment and pid the sampler must share.
pub const INTROSPECTION_SNIPPET: &str = r#"
import os as _km_os
import sys as _km_sys
from IPython.display import display as _km_display

_km_display(
    {
        "application/vnd.jupyter.monitoring+json": {
            "executable": _km_sys.executable,
            "env": dict(_km_os.environ),
            "pid": _km_os.getpid(),
        }
    },
    raw=True,
)
del _km_os, _km_sys, _km_display
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    Starting,
    Idle,
    Busy,
    Terminating,
    Restarting,
    Autorestarting,
    Dead,
    #[serde(other)]
    Unknown,
}

impl KernelStatus {
    /// Statuses after which a previously discovered process identity is stale.
    pub fn invalidates_process(self) -> bool {
        matches!(
            self,
            KernelStatus::Starting
                | KernelStatus::Restarting
                | KernelStatus::Autorestarting
                | KernelStatus::Terminating
                | KernelStatus::Dead
        )
    }

    /// Statuses that mean the kernel is up and can run the introspection snippet.
    pub fn is_ready(self) -> bool {
        matches!(self, KernelStatus::Idle | KernelStatus::Busy)
    }
}

/// One structured output item produced by executing code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputItem {
    pub mime: String,
    /// UTF-8 payload (JSON text for structured MIME types).
    pub data: String,
}

/// Interpreter, environment and pid of a running kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelProcessInfo {
    pub executable: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub pid: u32,
}

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("notebook host is not connected")]
    Disconnected,
    #[error("kernel for {0} is no longer available")]
    Gone(String),
}

#[async_trait]
pub trait Kernel: Send + Sync {
    /// Stable identity of this kernel session.
    fn id(&self) -> &str;

    fn language(&self) -> &str;

    /// Runs `code` and streams back output items until the execution finishes.
    async fn execute_code(&self, code: &str) -> Result<mpsc::Receiver<OutputItem>, KernelError>;

    fn subscribe_status(&self) -> broadcast::Receiver<KernelStatus>;
}

#[async_trait]
pub trait KernelRuntime: Send + Sync {
    /// Kernel currently bound to the notebook at `path`, if any.
    async fn get_kernel(&self, path: &str) -> Option<Arc<dyn Kernel>>;
}

/// Resolves the notebook's kernel, but only if it is a Python kernel.
pub async fn get_python_kernel(runtime: &dyn KernelRuntime, path: &str) -> Option<Arc<dyn Kernel>> {
    let kernel = runtime.get_kernel(path).await?;
    if !kernel.language().eq_ignore_ascii_case("python") {
        tracing::debug!(notebook = %path, language = kernel.language(), "not a python kernel");
        return None;
    }
    Some(kernel)
}

/// Asks the kernel to report its own process identity. Returns `None` when the kernel yields no
/// such output within `timeout` (not ready, execution failed, or the payload did not parse).
pub async fn get_kernel_process_info(kernel: &dyn Kernel, timeout: Duration) -> Option<KernelProcessInfo> {
    let lookup = async {
        let mut outputs = match kernel.execute_code(INTROSPECTION_SNIPPET).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::debug!(error = %e, kernel = kernel.id(), "introspection failed");
                return None;
            }
        };
        while let Some(item) = outputs.recv().await {
            if item.mime != MONITORING_MIME {
                continue;
            }
            match serde_json::from_str::<KernelProcessInfo>(&item.data) {
                Ok(info) => return Some(info),
                Err(e) => {
                    tracing::debug!(error = %e, kernel = kernel.id(), "bad process info payload");
                    return None;
                }
            }
        }
        None
    };
    match tokio::time::timeout(timeout, lookup).await {
        Ok(info) => info,
        Err(_) => {
            tracing::debug!(kernel = kernel.id(), "introspection timed out");
            None
        }
    }
}
