// Host CPU and memory via sysinfo, shared process-wide

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use sysinfo::System;
use tracing::instrument;

/// Host-wide readings at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostSnapshot {
    /// System-wide CPU utilization, 0-100.
    pub cpu_percent: f64,
    pub total_memory: u64,
    pub free_memory: u64,
}

impl HostSnapshot {
    pub fn cpu_fraction(&self) -> f64 {
        (self.cpu_percent / 100.0).clamp(0.0, 1.0)
    }

    pub fn used_memory(&self) -> u64 {
        self.total_memory.saturating_sub(self.free_memory)
    }
}

pub trait HostInfoSource: Send + Sync {
    fn snapshot(&self) -> HostSnapshot;
}

/// sysinfo-backed host source. CPU usage is refreshed by a background task (a CPU reading needs
/// two refreshes some time apart); memory is read on demand.
pub struct SysinfoHost {
    sys: Arc<Mutex<System>>,
    cpu_percent: Mutex<f64>,
}

static SHARED: Mutex<Weak<SysinfoHost>> = Mutex::new(Weak::new());

/// Returns the process-wide host source, creating it and its CPU refresh task on first use.
/// The refresh task stops once the last holder drops its `Arc`. Must be called inside a tokio
/// runtime.
pub fn acquire(refresh: Duration) -> Arc<SysinfoHost> {
    let mut shared = SHARED.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(host) = shared.upgrade() {
        return host;
    }
    let host = Arc::new(SysinfoHost::new());
    *shared = Arc::downgrade(&host);
    spawn_cpu_refresh(Arc::downgrade(&host), refresh);
    tracing::debug!(refresh_ms = refresh.as_millis() as u64, "host info source started");
    host
}

fn spawn_cpu_refresh(host: Weak<SysinfoHost>, refresh: Duration) {
    let refresh = refresh.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(refresh);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            let Some(host) = host.upgrade() else {
                break;
            };
            if let Err(e) = host.refresh_cpu().await {
                tracing::warn!(error = %e, operation = "refresh_cpu", "host CPU refresh failed");
            }
        }
        tracing::debug!("host info source stopped");
    });
}

impl Default for SysinfoHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoHost {
    pub fn new() -> Self {
        let mut sys = System::new();
        // Baseline for the first usage delta.
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        Self {
            sys: Arc::new(Mutex::new(sys)),
            cpu_percent: Mutex::new(0.0),
        }
    }

    #[instrument(skip(self), fields(repo = "sysinfo", operation = "refresh_cpu"))]
    pub async fn refresh_cpu(&self) -> anyhow::Result<f64> {
        let sys = self.sys.clone();
        let usage = tokio::task::spawn_blocking(move || {
            let mut sys = sys
                .lock()
                .map_err(|e| anyhow::anyhow!("sysinfo lock poisoned: {}", e))?;
            sys.refresh_cpu_usage();
            Ok::<f64, anyhow::Error>((sys.global_cpu_usage() as f64).clamp(0.0, 100.0))
        })
        .await
        .map_err(|e| anyhow::anyhow!("sysinfo task join: {}", e))??;
        *self
            .cpu_percent
            .lock()
            .map_err(|e| anyhow::anyhow!("cpu cache lock poisoned: {}", e))? = usage;
        Ok(usage)
    }

    pub fn cpu_percent(&self) -> f64 {
        self.cpu_percent.lock().map(|v| *v).unwrap_or(0.0)
    }
}

impl HostInfoSource for SysinfoHost {
    fn snapshot(&self) -> HostSnapshot {
        let cpu_percent = self.cpu_percent();
        let Ok(mut sys) = self.sys.lock() else {
            return HostSnapshot {
                cpu_percent,
                ..HostSnapshot::default()
            };
        };
        sys.refresh_memory();
        HostSnapshot {
            cpu_percent,
            total_memory: sys.total_memory(),
            free_memory: sys.available_memory(),
        }
    }
}
