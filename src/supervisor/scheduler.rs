// One-second aggregation tick: host heartbeat synthesis, gap-fill, hysteresis

use std::collections::HashSet;
use std::time::Duration;

use crate::host_info::HostSnapshot;
use crate::models::{CpuReading, MemoryReading, Sample, align_to_second};
use crate::sampler::KernelReading;

/// Fixed aggregation period, independent of the chart's poll interval.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long a tick waits for real data before synthesizing a heartbeat while notebooks are
/// supervised. Without supervised notebooks the heartbeat goes out every tick.
const MONITORED_HEARTBEAT_DELAY_MS: u64 = 1_000;

/// A supervised notebook as seen by the tick: its subject and last cached kernel reading.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredSubject {
    pub notebook: String,
    pub reading: KernelReading,
}

#[derive(Debug, Default)]
pub struct TickScheduler {
    last_emitted_at: u64,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Second-aligned time of the last tick that carried real data.
    pub fn last_emitted_at(&self) -> u64 {
        self.last_emitted_at
    }

    /// Turns the samples drained since the last tick into the batch to broadcast, or `None` when
    /// this tick has nothing to send.
    ///
    /// `any_supervised` is whether any notebook currently has a monitor; `monitored` lists the
    /// notebooks shown in the chart, which get gap-filled from their cached reading when absent
    /// from the batch.
    pub fn tick(
        &mut self,
        now_ms: u64,
        mut batch: Vec<Sample>,
        any_supervised: bool,
        monitored: &[MonitoredSubject],
        host: &HostSnapshot,
    ) -> Option<Vec<Sample>> {
        let required_delay = if any_supervised {
            MONITORED_HEARTBEAT_DELAY_MS
        } else {
            0
        };
        let now = align_to_second(now_ms);
        let synthesize =
            batch.is_empty() && now.saturating_sub(self.last_emitted_at) >= required_delay;

        if batch.is_empty() && !synthesize {
            return None;
        }
        if synthesize {
            batch.push(host_heartbeat(now, host));
        } else {
            self.last_emitted_at = now;
        }

        let present: HashSet<&str> = batch.iter().map(|s| s.notebook.as_str()).collect();
        let mut seen = HashSet::new();
        let timestamps: Vec<u64> = batch
            .iter()
            .map(|s| s.timestamp)
            .filter(|t| seen.insert(*t))
            .collect();
        let fills: Vec<Sample> = monitored
            .iter()
            .filter(|m| !present.contains(m.notebook.as_str()))
            .flat_map(|m| {
                timestamps
                    .iter()
                    .map(move |&timestamp| gap_fill(&m.notebook, m.reading, timestamp))
            })
            .collect();
        batch.extend(fills);
        Some(batch)
    }
}

/// Host-only sample for the second that just ended.
fn host_heartbeat(now: u64, host: &HostSnapshot) -> Sample {
    Sample {
        notebook: String::new(),
        timestamp: now.saturating_sub(1_000),
        cpu: Some(CpuReading {
            kernel: 0.0,
            system: host.cpu_fraction(),
        }),
        memory: Some(MemoryReading {
            kernel: 0,
            system: host.used_memory(),
            total: host.total_memory,
        }),
    }
}

/// Placeholder carrying a notebook's last known kernel reading. Host fields are zero so host
/// series skip it.
fn gap_fill(notebook: &str, reading: KernelReading, timestamp: u64) -> Sample {
    Sample {
        notebook: notebook.to_string(),
        timestamp,
        cpu: Some(CpuReading {
            kernel: reading.cpu_fraction,
            system: 0.0,
        }),
        memory: Some(MemoryReading {
            kernel: reading.memory_bytes,
            system: 0,
            total: 0,
        }),
    }
}
