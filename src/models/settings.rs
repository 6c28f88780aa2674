// Settings snapshot broadcast from the supervisor to every UI context

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
}

impl MetricKind {
    pub const ALL: [MetricKind; 2] = [MetricKind::Cpu, MetricKind::Memory];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
        }
    }
}

/// Identifies one series: metric kind plus subject (empty notebook = host).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default)]
    pub notebook: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, notebook: impl Into<String>) -> Self {
        Self {
            kind,
            notebook: notebook.into(),
        }
    }

    pub fn host(kind: MetricKind) -> Self {
        Self::new(kind, String::new())
    }

    pub fn is_host(&self) -> bool {
        self.notebook.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub enabled_metrics: Vec<MetricKey>,
    pub monitoring_notebooks: Vec<String>,
    pub show_cpu: bool,
    pub show_memory: bool,
    /// Visible window of the chart in milliseconds.
    pub view_duration: u64,
    /// Spacing between chart points in milliseconds.
    pub poll_interval: u64,
    pub zoom_level: f64,
    pub easing: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_metrics: vec![MetricKey::host(MetricKind::Cpu)],
            monitoring_notebooks: Vec::new(),
            show_cpu: true,
            show_memory: true,
            view_duration: 30_000,
            poll_interval: 1_000,
            zoom_level: 0.0,
            easing: true,
        }
    }
}

impl Settings {
    /// Number of steps that fit in the visible window.
    pub fn steps(&self) -> u64 {
        if self.poll_interval == 0 {
            return 0;
        }
        self.view_duration.div_ceil(self.poll_interval)
    }

    pub fn is_monitoring(&self, notebook: &str) -> bool {
        self.monitoring_notebooks.iter().any(|n| n == notebook)
    }

    pub fn is_enabled(&self, key: &MetricKey) -> bool {
        self.enabled_metrics.contains(key)
    }

    pub fn shows(&self, kind: MetricKind) -> bool {
        match kind {
            MetricKind::Cpu => self.show_cpu,
            MetricKind::Memory => self.show_memory,
        }
    }
}
