// Client-side settings mirror: owns every series and derives the enabled set

use super::metric::Metric;
use super::series::Point;
use crate::models::{FromClientMessage, MetricKey, MetricKind, Sample, Settings};

/// Colors used for the chart. Series colors cycle through `graphs`; the host always gets the
/// first one.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    pub background: String,
    pub foreground: String,
    pub border: String,
    pub graphs: Vec<String>,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            background: "#252526".to_string(),
            foreground: "#cccccc".to_string(),
            border: "#585858".to_string(),
            graphs: ["#f14c4c", "#cca700", "#3794ff", "#d18616", "#b180d7", "#89d185"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

pub struct ClientSettings {
    value: Settings,
    metrics: Vec<Metric>,
    steps: u64,
    palette: Palette,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSettings {
    pub fn new() -> Self {
        let value = Settings::default();
        let host_cpu = Metric::new(
            MetricKey::host(MetricKind::Cpu),
            value.view_duration,
            value.poll_interval,
        );
        Self {
            steps: value.steps(),
            value,
            metrics: vec![host_cpu],
            palette: Palette::default(),
        }
    }

    pub fn value(&self) -> &Settings {
        &self.value
    }

    /// Steps across the visible window.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn all_metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn metric(&self, key: &MetricKey) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.key() == key)
    }

    /// Enabled series, in creation order.
    pub fn enabled_metrics(&self) -> Vec<&Metric> {
        self.metrics
            .iter()
            .filter(|m| self.value.is_enabled(m.key()))
            .collect()
    }

    pub fn enabled_of(&self, kind: MetricKind) -> Vec<&Metric> {
        self.enabled_metrics()
            .into_iter()
            .filter(|m| m.kind() == kind)
            .collect()
    }

    pub fn metric_color(&self, key: &MetricKey) -> &str {
        let graphs = &self.palette.graphs;
        if key.is_host() || graphs.len() < 2 {
            return graphs.first().map(String::as_str).unwrap_or("#888888");
        }
        let mut notebooks: Vec<&str> = Vec::new();
        for metric in &self.metrics {
            let notebook = metric.notebook();
            if !notebook.is_empty() && !notebooks.contains(&notebook) {
                notebooks.push(notebook);
            }
        }
        let index = notebooks
            .iter()
            .position(|n| *n == key.notebook)
            .unwrap_or(0);
        &graphs[index % (graphs.len() - 1) + 1]
    }

    /// Message asking the supervisor to enable exactly `keys`, or `None` when that is already the
    /// enabled set. The local snapshot only changes once the supervisor broadcasts it.
    pub fn set_enabled_metrics(&self, keys: Vec<MetricKey>) -> Option<FromClientMessage> {
        let current: Vec<&MetricKey> = self.enabled_metrics().iter().map(|m| m.key()).collect();
        let unchanged = keys.len() == current.len() && keys.iter().all(|k| current.contains(&k));
        if unchanged {
            return None;
        }
        Some(FromClientMessage::SetEnabledMetrics { keys })
    }

    /// Flips every series of `notebook`: all off if any is enabled, else all on.
    pub fn toggle_metric(&self, notebook: &str) -> Option<FromClientMessage> {
        let enabled: Vec<MetricKey> = self
            .enabled_metrics()
            .iter()
            .map(|m| m.key().clone())
            .collect();
        let any_enabled = enabled.iter().any(|k| k.notebook == notebook);
        let keys = if any_enabled {
            enabled.into_iter().filter(|k| k.notebook != notebook).collect()
        } else {
            let mut keys = enabled;
            keys.extend(
                self.metrics
                    .iter()
                    .filter(|m| m.notebook() == notebook)
                    .map(|m| m.key().clone()),
            );
            keys
        };
        self.set_enabled_metrics(keys)
    }

    /// Applies a settings snapshot: adapts every series to the window, creates the series the
    /// snapshot needs and drops those of notebooks no longer monitored.
    pub fn update(&mut self, value: Settings) {
        for metric in &mut self.metrics {
            metric.reset(value.view_duration, value.poll_interval);
        }
        self.value = value;

        let mut wanted: Vec<MetricKey> = vec![MetricKey::host(MetricKind::Cpu)];
        for notebook in &self.value.monitoring_notebooks {
            for kind in MetricKind::ALL {
                wanted.push(MetricKey::new(kind, notebook.clone()));
            }
        }
        wanted.extend(self.value.enabled_metrics.iter().cloned());

        let timeline: Vec<u64> = self
            .metrics
            .first()
            .map(|host| host.series().points().map(|p| p.time).collect())
            .unwrap_or_default();
        for key in wanted {
            if !key.is_host() && !self.value.is_monitoring(&key.notebook) {
                continue;
            }
            if self.metric(&key).is_some() {
                continue;
            }
            let mut metric = Metric::new(key, self.value.view_duration, self.value.poll_interval);
            // Line the new series up with the existing timeline.
            metric.set_data(timeline.iter().map(|&time| Point { value: 0.0, time }));
            self.metrics.push(metric);
        }

        let monitoring = &self.value.monitoring_notebooks;
        self.metrics
            .retain(|m| m.key().is_host() || monitoring.iter().any(|n| n == m.notebook()));
        self.steps = self.value.steps();
    }

    pub fn ingest(&mut self, sample: &Sample) {
        for metric in &mut self.metrics {
            metric.update(sample);
        }
    }

    pub fn clear_data(&mut self) {
        for metric in &mut self.metrics {
            metric.set_data(std::iter::empty());
        }
    }
}
