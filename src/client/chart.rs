// Two-lane chart: lane layout, configurator hysteresis, value labels, SVG rendering

use std::fmt::Write;

use super::animation::FrameQueue;
use super::format::duration_format;
use super::lane::{LABEL_HEIGHT, Lane};
use super::metric::Metric;
use super::settings::ClientSettings;
use crate::models::{FromClientMessage, MetricKey, MetricKind};

const NATURAL_ASPECT_RATIO: f64 = 16.0 / 9.0;
const AUTO_OPEN_ASPECT_RATIO: f64 = 4.0 / 3.0;
const AUTO_CLOSE_ASPECT_RATIO: f64 = (NATURAL_ASPECT_RATIO + AUTO_OPEN_ASPECT_RATIO) / 2.0;

const OPEN_TO_SIDE_WIDTH: f64 = 250.0;
const OPEN_TO_SIDE_MIN_SPACE: f64 = 600.0;
const CONFIGURATOR_ROW_HEIGHT: f64 = 22.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfiguratorPlacement {
    /// Closed; the inline label row shows instead.
    Hidden,
    Side,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChartLayout {
    pub graph_width: f64,
    pub graph_height: f64,
    pub configurator: ConfiguratorPlacement,
}

/// Inline label of one enabled series (kernel memory folds into its notebook's CPU label).
#[derive(Debug, Clone, PartialEq)]
pub struct ValueLabel {
    pub key: MetricKey,
    pub name: String,
    pub color: String,
    pub text: String,
}

/// One row of the metric picker, per subject.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfiguratorEntry {
    pub notebook: String,
    pub name: String,
    pub enabled: bool,
    pub available: bool,
    pub color: String,
}

pub struct Chart {
    width: f64,
    height: f64,
    cpu: Lane,
    memory: Lane,
    config_open: bool,
    manual_toggle: bool,
    has_any_data: bool,
    labels: Vec<ValueLabel>,
}

impl Chart {
    pub fn new(width: f64, height: f64, settings: &ClientSettings, frames: &mut FrameQueue) -> Self {
        let mut chart = Self {
            width,
            height,
            cpu: Lane::new(MetricKind::Cpu, width, height / 2.0),
            memory: Lane::new(MetricKind::Memory, width, height / 2.0),
            config_open: aspect_ratio(width, height) < AUTO_OPEN_ASPECT_RATIO,
            manual_toggle: false,
            has_any_data: false,
            labels: Vec::new(),
        };
        chart.apply_settings(settings, frames);
        chart
    }

    pub fn lane(&self, kind: MetricKind) -> &Lane {
        match kind {
            MetricKind::Cpu => &self.cpu,
            MetricKind::Memory => &self.memory,
        }
    }

    fn lane_mut(&mut self, kind: MetricKind) -> &mut Lane {
        match kind {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Memory => &mut self.memory,
        }
    }

    pub fn is_config_open(&self) -> bool {
        self.config_open
    }

    pub fn has_any_data(&self) -> bool {
        self.has_any_data
    }

    pub fn labels(&self) -> &[ValueLabel] {
        &self.labels
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn left_time_label(&self, settings: &ClientSettings) -> String {
        let seconds = settings.value().view_duration as f64 / 1000.0;
        format!("{} ago", duration_format(seconds))
    }

    /// Timestamp under the pointer, from whichever lane has one.
    pub fn hovered_time(&self) -> Option<u64> {
        self.cpu.hovered_time().or(self.memory.hovered_time())
    }

    pub fn layout(&self, settings: &ClientSettings) -> ChartLayout {
        if !self.config_open {
            return ChartLayout {
                graph_width: self.width,
                graph_height: (self.height - LABEL_HEIGHT).max(0.0),
                configurator: ConfiguratorPlacement::Hidden,
            };
        }
        if self.width < OPEN_TO_SIDE_MIN_SPACE {
            let rows = self.configurator_entries(settings).len() as f64;
            return ChartLayout {
                graph_width: self.width,
                graph_height: (self.height - rows * CONFIGURATOR_ROW_HEIGHT).max(0.0),
                configurator: ConfiguratorPlacement::Below,
            };
        }
        ChartLayout {
            graph_width: self.width - OPEN_TO_SIDE_WIDTH,
            graph_height: self.height,
            configurator: ConfiguratorPlacement::Side,
        }
    }

    /// Resizes the chart. Unless the user toggled the configurator, it opens below the 4:3
    /// aspect ratio and closes above the midpoint of 4:3 and 16:9; in between it stays as is.
    pub fn update_size(
        &mut self,
        width: f64,
        height: f64,
        settings: &ClientSettings,
        frames: &mut FrameQueue,
    ) {
        if !self.manual_toggle {
            let ratio = aspect_ratio(width, height);
            if ratio < AUTO_OPEN_ASPECT_RATIO {
                self.config_open = true;
            } else if ratio > AUTO_CLOSE_ASPECT_RATIO {
                self.config_open = false;
            }
        }
        self.width = width;
        self.height = height;

        let layout = self.layout(settings);
        for kind in MetricKind::ALL {
            let lane = self.lane_mut(kind);
            lane.update_size(layout.graph_width, layout.graph_height / 2.0);
            lane.redraw(settings, frames);
        }
    }

    /// Opens or closes the configurator by hand (`None` flips it). Turns off automatic
    /// open/close for the rest of the session.
    pub fn toggle_configuration(
        &mut self,
        open: Option<bool>,
        settings: &ClientSettings,
        frames: &mut FrameQueue,
    ) {
        let open = open.unwrap_or(!self.config_open);
        if open == self.config_open {
            return;
        }
        self.manual_toggle = true;
        self.config_open = open;
        self.update_size(self.width, self.height, settings, frames);
    }

    /// Re-enables automatic configurator placement.
    pub fn reset_configuration_toggle(&mut self, settings: &ClientSettings, frames: &mut FrameQueue) {
        self.manual_toggle = false;
        self.update_size(self.width, self.height, settings, frames);
    }

    /// New data arrived. Until any series has data, the enabled set is narrowed to the series
    /// that have some (or widened to all); the returned message carries that request.
    pub fn update_metrics(
        &mut self,
        settings: &ClientSettings,
        frames: &mut FrameQueue,
    ) -> Option<FromClientMessage> {
        let mut outgoing = None;
        if !self.has_any_data {
            let with_data: Vec<MetricKey> = settings
                .enabled_metrics()
                .into_iter()
                .filter(|m| m.has_data())
                .map(|m| m.key().clone())
                .collect();
            let keys = if with_data.is_empty() {
                settings.all_metrics().iter().map(|m| m.key().clone()).collect()
            } else {
                with_data
            };
            outgoing = settings.set_enabled_metrics(keys);
        }

        let ease = settings.value().easing;
        self.cpu.update_metrics(settings, ease, frames);
        self.memory.update_metrics(settings, ease, frames);
        if self.cpu.hovered_index().is_none() && self.memory.hovered_index().is_none() {
            self.update_value_labels(settings);
        }
        self.has_any_data = settings.all_metrics().iter().any(|m| m.has_data());
        outgoing
    }

    /// Rebuilds labels and layout for a new settings snapshot.
    pub fn apply_settings(&mut self, settings: &ClientSettings, frames: &mut FrameQueue) {
        self.labels = settings
            .enabled_metrics()
            .into_iter()
            .filter(|m| m.notebook().is_empty() || m.kind() == MetricKind::Cpu)
            .map(|m| ValueLabel {
                key: m.key().clone(),
                name: m.name(),
                color: settings.metric_color(m.key()).to_string(),
                text: m.format(m.current()),
            })
            .collect();
        self.update_size(self.width, self.height, settings, frames);
        self.update_value_labels(settings);
    }

    pub fn on_frame(&mut self, kind: MetricKind, now: f64, frames: &mut FrameQueue) {
        self.lane_mut(kind).on_frame(now, frames);
    }

    /// Pointer over either lane hovers the same step on both.
    pub fn pointer_move(&mut self, x: f64, settings: &ClientSettings) {
        let cpu = self.cpu.pointer_move(x, settings);
        let memory = self.memory.pointer_move(x, settings);
        if cpu || memory {
            self.update_value_labels(settings);
        }
    }

    pub fn pointer_leave(&mut self, settings: &ClientSettings) {
        let cpu = self.cpu.clear_hover();
        let memory = self.memory.clear_hover();
        if cpu || memory {
            self.update_value_labels(settings);
        }
    }

    pub fn cancel_animations(&mut self, frames: &mut FrameQueue) {
        self.cpu.cancel_animation(frames);
        self.memory.cancel_animation(frames);
    }

    /// Label text at the hovered timestamp, or the latest values.
    fn update_value_labels(&mut self, settings: &ClientSettings) {
        let hovered = self.hovered_time();
        let enabled = settings.enabled_metrics();
        for label in &mut self.labels {
            let Some(metric) = settings.metric(&label.key) else {
                continue;
            };
            let value_of = |m: &Metric| {
                hovered
                    .and_then(|t| m.value_at_time(t))
                    .unwrap_or_else(|| m.current())
            };
            let text = metric.format(value_of(metric));
            let matching = enabled.iter().find(|m| {
                m.key() != metric.key()
                    && m.kind() != metric.kind()
                    && m.notebook() == metric.notebook()
            });
            label.text = match matching {
                None => text,
                Some(other) => {
                    let other_text = other.format(value_of(*other));
                    match metric.kind() {
                        MetricKind::Cpu => format!("{}, {}", text, other_text),
                        MetricKind::Memory => format!("{}, {}", other_text, text),
                    }
                }
            };
        }
    }

    /// Picker rows, one per subject, enabled rows first.
    pub fn configurator_entries(&self, settings: &ClientSettings) -> Vec<ConfiguratorEntry> {
        let value = settings.value();
        let mut entries: Vec<ConfiguratorEntry> = Vec::new();
        for metric in settings.all_metrics() {
            if entries.iter().any(|e| e.notebook == metric.notebook()) {
                continue;
            }
            let live = metric.notebook().is_empty() || value.is_monitoring(metric.notebook());
            entries.push(ConfiguratorEntry {
                notebook: metric.notebook().to_string(),
                name: metric.name(),
                enabled: live
                    && value
                        .enabled_metrics
                        .iter()
                        .any(|k| k.notebook == metric.notebook()),
                available: metric.has_data(),
                color: settings.metric_color(metric.key()).to_string(),
            });
        }
        entries.sort_by_key(|e| !e.enabled);
        entries
    }

    pub fn render_svg(&self, settings: &ClientSettings) -> String {
        let palette = settings.palette();
        let layout = self.layout(settings);
        let lane_height = layout.graph_height / 2.0;
        let mut out = String::new();
        let _ = write!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        let _ = write!(
            out,
            r#"<rect width="100%" height="100%" fill="{}"/>"#,
            palette.background
        );

        let mut top = 0.0;
        let mut lane_names = Vec::new();
        for (kind, shown, name) in [
            (MetricKind::Cpu, settings.value().show_cpu, "CPU"),
            (MetricKind::Memory, settings.value().show_memory, "Memory"),
        ] {
            if !shown {
                continue;
            }
            out.push_str(&self.lane(kind).render_svg(settings, top));
            lane_names.push((name, top));
            top += lane_height;
        }
        for (name, y) in lane_names {
            text(&mut out, 4.0, y + 12.0, "start", &palette.foreground, name);
        }

        if !self.has_any_data {
            text(
                &mut out,
                layout.graph_width / 2.0,
                layout.graph_height / 2.0,
                "middle",
                &palette.foreground,
                "No data available yet",
            );
        }
        let time_y = (layout.graph_height - 4.0).max(0.0);
        text(
            &mut out,
            4.0,
            time_y,
            "start",
            &palette.foreground,
            &self.left_time_label(settings),
        );
        text(
            &mut out,
            layout.graph_width - 4.0,
            time_y,
            "end",
            &palette.foreground,
            "now",
        );

        match layout.configurator {
            ConfiguratorPlacement::Hidden => {
                let mut x = 4.0;
                let y = layout.graph_height + LABEL_HEIGHT - 5.0;
                for label in &self.labels {
                    let content = format!("{}: {}", label.name, label.text);
                    text(&mut out, x, y, "start", &label.color, &content);
                    x += content.chars().count() as f64 * 7.0 + 12.0;
                }
            }
            ConfiguratorPlacement::Side | ConfiguratorPlacement::Below => {
                let (x, mut y) = if layout.configurator == ConfiguratorPlacement::Side {
                    (layout.graph_width + 8.0, 0.0)
                } else {
                    (4.0, layout.graph_height)
                };
                for entry in self.configurator_entries(settings) {
                    y += CONFIGURATOR_ROW_HEIGHT;
                    let value = self
                        .labels
                        .iter()
                        .find(|l| l.key.notebook == entry.notebook)
                        .map(|l| l.text.as_str())
                        .unwrap_or_default();
                    let color = if entry.enabled {
                        entry.color.as_str()
                    } else {
                        palette.border.as_str()
                    };
                    let content = if entry.available && !value.is_empty() {
                        format!("{} {}", entry.name, value)
                    } else {
                        entry.name.clone()
                    };
                    text(&mut out, x, y - 6.0, "start", color, &content);
                }
            }
        }
        out.push_str("</svg>");
        out
    }
}

fn aspect_ratio(width: f64, height: f64) -> f64 {
    if height <= 0.0 {
        return f64::INFINITY;
    }
    width / height
}

fn text(out: &mut String, x: f64, y: f64, anchor: &str, fill: &str, content: &str) {
    let _ = write!(
        out,
        r#"<text x="{:.2}" y="{:.2}" text-anchor="{}" fill="{}" font-size="11">{}</text>"#,
        x,
        y,
        anchor,
        fill,
        escape(content)
    );
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
