// Notebook documents as reported by the editor host

/// Notebook types whose kernels can be supervised.
const JUPYTER_NOTEBOOK_TYPES: [&str; 2] = ["jupyter-notebook", "interactive"];

/// An open notebook. The supervisor's workspace owns it; monitors only hold a `Weak` to it, so
/// closing the notebook ends their access without any teardown ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotebookDocument {
    pub path: String,
    pub notebook_type: String,
}

impl NotebookDocument {
    pub fn new(path: impl Into<String>, notebook_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            notebook_type: notebook_type.into(),
        }
    }

    pub fn is_jupyter(&self) -> bool {
        JUPYTER_NOTEBOOK_TYPES.contains(&self.notebook_type.as_str())
    }
}

/// Notebook lifecycle and command events forwarded from the editor host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    NotebookOpened(NotebookDocument),
    NotebookClosed(String),
    NotebookChanged(String),
    ActiveNotebookChanged(Option<String>),
    /// The notebook's kernel was swapped, attached or removed.
    KernelChanged(String),
    ToggleCpu,
    ToggleMemory,
}
