// Editor host <-> service bridge protocol (JSON, tagged by "type")

use serde::{Deserialize, Serialize};

use crate::kernel::{KernelStatus, OutputItem};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotebookRef {
    pub path: String,
    pub notebook_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelDescriptor {
    pub id: String,
    pub language: String,
}

/// Events and execution results reported by the editor host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FromHostMessage {
    NotebookOpened {
        notebook: NotebookRef,
    },
    NotebookClosed {
        path: String,
    },
    /// Structural document change (cells added/removed/executed).
    NotebookChanged {
        path: String,
    },
    ActiveNotebookChanged {
        #[serde(default)]
        path: Option<String>,
    },
    KernelChanged {
        path: String,
        #[serde(default)]
        kernel: Option<KernelDescriptor>,
    },
    KernelStatus {
        path: String,
        status: KernelStatus,
    },
    #[serde(rename_all = "camelCase")]
    ExecuteOutput {
        request_id: u64,
        items: Vec<OutputItem>,
    },
    #[serde(rename_all = "camelCase")]
    ExecuteDone {
        request_id: u64,
    },
    ToggleCpu,
    ToggleMemory,
}

/// Requests sent to the editor host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToHostMessage {
    #[serde(rename_all = "camelCase")]
    Execute {
        request_id: u64,
        path: String,
        code: String,
    },
}
