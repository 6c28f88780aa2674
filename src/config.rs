use serde::Deserialize;

use crate::models::Settings;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub monitoring: MonitoringConfig,
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub chart: ChartConfig,
    pub state: StateConfig,
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often the shared host CPU reading is refreshed.
    pub host_cpu_refresh_ms: u64,
    /// Re-attach attempts after a notebook change that did not reach `started`.
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_introspection_timeout_ms")]
    pub introspection_timeout_ms: u64,
    /// How often to log app stats (UI clients, monitors) at INFO level.
    pub stats_log_interval_secs: u64,
}

fn default_retry_delays_ms() -> Vec<u64> {
    vec![1_000, 5_000]
}

fn default_introspection_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct SamplerConfig {
    /// Sampler program, run with the kernel's own interpreter.
    pub script: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChartConfig {
    #[serde(default = "default_view_duration_ms")]
    pub view_duration_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub easing: bool,
    #[serde(default)]
    pub zoom_level: f64,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            view_duration_ms: default_view_duration_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            easing: true,
            zoom_level: 0.0,
        }
    }
}

fn default_view_duration_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateConfig {
    /// SQLite file holding the workspace-scoped flags.
    pub path: String,
    pub workspace: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Messages buffered per UI client; a full queue drops new messages for that client.
    pub client_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_preview_width")]
    pub width: u32,
    #[serde(default = "default_preview_height")]
    pub height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            width: default_preview_width(),
            height: default_preview_height(),
        }
    }
}

fn default_preview_width() -> u32 {
    400
}

fn default_preview_height() -> u32 {
    300
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            self.monitoring.host_cpu_refresh_ms > 0,
            "monitoring.host_cpu_refresh_ms must be > 0, got {}",
            self.monitoring.host_cpu_refresh_ms
        );
        anyhow::ensure!(
            self.monitoring.introspection_timeout_ms > 0,
            "monitoring.introspection_timeout_ms must be > 0, got {}",
            self.monitoring.introspection_timeout_ms
        );
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            !self.sampler.script.is_empty(),
            "sampler.script must be non-empty"
        );
        anyhow::ensure!(
            self.chart.view_duration_ms > 0,
            "chart.view_duration_ms must be > 0, got {}",
            self.chart.view_duration_ms
        );
        anyhow::ensure!(
            self.chart.poll_interval_ms > 0,
            "chart.poll_interval_ms must be > 0, got {}",
            self.chart.poll_interval_ms
        );
        anyhow::ensure!(!self.state.path.is_empty(), "state.path must be non-empty");
        anyhow::ensure!(
            !self.state.workspace.is_empty(),
            "state.workspace must be non-empty"
        );
        anyhow::ensure!(
            self.publishing.client_queue_capacity > 0,
            "publishing.client_queue_capacity must be > 0, got {}",
            self.publishing.client_queue_capacity
        );
        anyhow::ensure!(
            self.preview.width > 0 && self.preview.height > 0,
            "preview size must be > 0, got {}x{}",
            self.preview.width,
            self.preview.height
        );
        Ok(())
    }

    pub fn retry_delays(&self) -> Vec<std::time::Duration> {
        self.monitoring
            .retry_delays_ms
            .iter()
            .map(|&ms| std::time::Duration::from_millis(ms))
            .collect()
    }

    /// Settings snapshot the supervisor starts from; the lane flags come from the workspace store.
    pub fn initial_settings(&self, show_cpu: bool, show_memory: bool) -> Settings {
        Settings {
            show_cpu,
            show_memory,
            view_duration: self.chart.view_duration_ms,
            poll_interval: self.chart.poll_interval_ms,
            zoom_level: self.chart.zoom_level,
            easing: self.chart.easing,
            ..Settings::default()
        }
    }
}
