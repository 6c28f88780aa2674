// Metric kinds as a closed variant with a behavior table, over a plain or rate series

use super::format::{format_percent, format_size, notebook_name};
use super::series::{DerivativeSeries, MetricSeries, Point};
use crate::models::{MetricKey, MetricKind, Sample};

/// Which reading a series follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricSource {
    HostCpu,
    KernelCpu,
    HostMemory,
    KernelMemory,
}

impl MetricSource {
    pub fn for_key(key: &MetricKey) -> Self {
        match (key.kind, key.is_host()) {
            (MetricKind::Cpu, true) => MetricSource::HostCpu,
            (MetricKind::Cpu, false) => MetricSource::KernelCpu,
            (MetricKind::Memory, true) => MetricSource::HostMemory,
            (MetricKind::Memory, false) => MetricSource::KernelMemory,
        }
    }

    pub fn kind(self) -> MetricKind {
        match self {
            MetricSource::HostCpu | MetricSource::KernelCpu => MetricKind::Cpu,
            MetricSource::HostMemory | MetricSource::KernelMemory => MetricKind::Memory,
        }
    }

    /// The value this source takes from `sample`, for a series following `subject`.
    ///
    /// Host sources skip gap-fill placeholders (zero host CPU, zero total memory). Kernel sources
    /// take host-only samples too, which carry a zero kernel reading.
    pub fn extract(self, subject: &str, sample: &Sample) -> Option<f64> {
        let for_subject = sample.notebook.is_empty() || sample.notebook == subject;
        match self {
            MetricSource::HostCpu => sample
                .cpu
                .filter(|cpu| cpu.system > 0.0)
                .map(|cpu| cpu.system),
            MetricSource::KernelCpu if for_subject => sample.cpu.map(|cpu| cpu.kernel),
            MetricSource::HostMemory => sample
                .memory
                .filter(|memory| memory.total > 0)
                .map(|memory| memory.system as f64),
            MetricSource::KernelMemory if for_subject => {
                sample.memory.map(|memory| memory.kernel as f64)
            }
            MetricSource::KernelCpu | MetricSource::KernelMemory => None,
        }
    }

    pub fn format(self, value: f64) -> String {
        match self.kind() {
            MetricKind::Cpu => format_percent(value),
            MetricKind::Memory => format_size(value),
        }
    }

    /// CPU is a fraction of the machine, so its scale is fixed.
    pub fn fixed_max_y(self) -> Option<f64> {
        match self.kind() {
            MetricKind::Cpu => Some(1.0),
            MetricKind::Memory => None,
        }
    }

    pub fn name(self, subject: &str) -> String {
        match self {
            MetricSource::HostCpu => "System CPU Usage".to_string(),
            MetricSource::HostMemory => "System Virtual Memory".to_string(),
            MetricSource::KernelCpu => or_default(notebook_name(subject), "CPU Usage"),
            MetricSource::KernelMemory => or_default(notebook_name(subject), "Memory Used"),
        }
    }

    pub fn short(self, subject: &str) -> String {
        match self {
            MetricSource::HostCpu => "System CPU".to_string(),
            MetricSource::HostMemory => "System Memory".to_string(),
            MetricSource::KernelCpu => or_default(notebook_name(subject), "CPU"),
            MetricSource::KernelMemory => or_default(notebook_name(subject), "Memory"),
        }
    }
}

fn or_default(name: String, fallback: &str) -> String {
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

#[derive(Debug, Clone)]
pub enum Series {
    Plain(MetricSeries),
    Rate(DerivativeSeries),
}

impl Series {
    fn store(&self) -> &MetricSeries {
        match self {
            Series::Plain(series) => series,
            Series::Rate(series) => series.series(),
        }
    }
}

/// One chart series: its key, its source behavior and its data.
#[derive(Debug, Clone)]
pub struct Metric {
    key: MetricKey,
    source: MetricSource,
    series: Series,
}

impl Metric {
    pub fn new(key: MetricKey, duration: u64, interval: u64) -> Self {
        Self {
            source: MetricSource::for_key(&key),
            key,
            series: Series::Plain(MetricSeries::new(duration, interval)),
        }
    }

    /// A metric charting the per-second change of its source instead of the raw value.
    pub fn rate(key: MetricKey, duration: u64, interval: u64) -> Self {
        Self {
            source: MetricSource::for_key(&key),
            key,
            series: Series::Rate(DerivativeSeries::new(duration, interval)),
        }
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    pub fn kind(&self) -> MetricKind {
        self.key.kind
    }

    pub fn notebook(&self) -> &str {
        &self.key.notebook
    }

    pub fn source(&self) -> MetricSource {
        self.source
    }

    pub fn update(&mut self, sample: &Sample) {
        let Some(value) = self.source.extract(&self.key.notebook, sample) else {
            return;
        };
        match &mut self.series {
            Series::Plain(series) => series.push(sample.timestamp, value),
            Series::Rate(series) => series.push(sample.timestamp, value),
        }
    }

    pub fn reset(&mut self, duration: u64, interval: u64) {
        match &mut self.series {
            Series::Plain(series) => series.reset(duration, interval),
            Series::Rate(series) => series.reset(duration, interval),
        }
    }

    pub fn set_data(&mut self, points: impl IntoIterator<Item = Point>) {
        match &mut self.series {
            Series::Plain(series) => series.set_data(points),
            Series::Rate(series) => series.set_data(points),
        }
    }

    pub fn series(&self) -> &MetricSeries {
        self.series.store()
    }

    pub fn has_data(&self) -> bool {
        self.series().has_data()
    }

    pub fn current(&self) -> f64 {
        self.series().current()
    }

    pub fn index(&self) -> u64 {
        self.series().index()
    }

    pub fn value_at(&self, index: u64) -> Option<Point> {
        self.series().value_at(index)
    }

    pub fn value_at_time(&self, time: u64) -> Option<f64> {
        self.series().value_at_time(time)
    }

    pub fn values(&self) -> Vec<f64> {
        self.series().values()
    }

    pub fn max_y(&self) -> f64 {
        self.source
            .fixed_max_y()
            .unwrap_or_else(|| self.series().max_y())
    }

    pub fn format(&self, value: f64) -> String {
        self.source.format(value)
    }

    pub fn name(&self) -> String {
        self.source.name(&self.key.notebook)
    }

    pub fn short(&self) -> String {
        self.source.short(&self.key.notebook)
    }
}
