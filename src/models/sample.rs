// One CPU/memory measurement for the host or a notebook kernel

use serde::{Deserialize, Serialize};

/// CPU usage as fractions of the whole machine (0.0 - 1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuReading {
    pub kernel: f64,
    pub system: f64,
}

/// Memory usage in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryReading {
    pub kernel: u64,
    pub system: u64,
    pub total: u64,
}

/// A sample for one subject. `notebook` is empty for host-only samples, else the notebook path.
/// `timestamp` is epoch milliseconds rounded down to the second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    #[serde(default)]
    pub notebook: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryReading>,
}

impl Sample {
    pub fn is_host_only(&self) -> bool {
        self.notebook.is_empty()
    }
}

/// Rounds epoch milliseconds down to the whole second.
pub fn align_to_second(ms: u64) -> u64 {
    ms - ms % 1000
}

/// Current epoch time in milliseconds (0 if the clock is before the epoch).
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, operation = "get_timestamp", "system time error");
            0
        })
}
