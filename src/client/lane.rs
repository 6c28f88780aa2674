// One chart lane: builds the series paths of a metric kind, eases them in, tracks hover

use std::fmt::Write;

use super::animation::{FrameHandle, FrameQueue, FrameTarget};
use super::metric::Metric;
use super::path::Path;
use super::settings::ClientSettings;
use crate::models::{MetricKey, MetricKind};

/// Height of the inline label row under the lanes.
pub const LABEL_HEIGHT: f64 = 18.0;
/// Duration of the scroll-in transition.
pub const EASING_MS: f64 = 200.0;

const RULER_WIDTH: f64 = 1.0;
const LINE_WIDTH: f64 = 1.0;
const RULERS: usize = 4;
/// Bound on path rebuilds while a later series keeps raising the shared scale.
const MAX_PATH_PASSES: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesPath {
    pub key: MetricKey,
    pub color: String,
    pub path: Path,
}

#[derive(Debug, Clone, Copy)]
struct Ease {
    handle: FrameHandle,
    length: f64,
    dx: f64,
    start: Option<f64>,
}

pub struct Lane {
    kind: MetricKind,
    width: f64,
    height: f64,
    rulers: Path,
    paths: Vec<SeriesPath>,
    scale: f64,
    ease: Option<Ease>,
    hovered_index: Option<u64>,
    hovered_time: Option<u64>,
    offset: f64,
    draws: u64,
}

impl Lane {
    pub fn new(kind: MetricKind, width: f64, height: f64) -> Self {
        let mut lane = Self {
            kind,
            width,
            height,
            rulers: Path::new(),
            paths: Vec::new(),
            scale: 0.0,
            ease: None,
            hovered_index: None,
            hovered_time: None,
            offset: 0.0,
            draws: 0,
        };
        lane.rulers = lane.create_rulers();
        lane
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn size(&self) -> (f64, f64) {
        (self.width, self.height)
    }

    pub fn paths(&self) -> &[SeriesPath] {
        &self.paths
    }

    pub fn rulers(&self) -> &Path {
        &self.rulers
    }

    /// Scale the current paths were built with.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Horizontal offset of the last drawn frame.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }

    pub fn is_easing(&self) -> bool {
        self.ease.is_some()
    }

    pub fn hovered_index(&self) -> Option<u64> {
        self.hovered_index
    }

    pub fn hovered_time(&self) -> Option<u64> {
        self.hovered_time
    }

    pub fn update_size(&mut self, width: f64, height: f64) {
        self.width = width.max(0.0);
        self.height = height.max(0.0);
        self.rulers = self.create_rulers();
    }

    /// Rebuilds paths without easing, e.g. after settings or size changed.
    pub fn redraw(&mut self, settings: &ClientSettings, frames: &mut FrameQueue) {
        self.rulers = self.create_rulers();
        self.update_metrics(settings, false, frames);
    }

    /// Rebuilds the paths for new data. With `ease`, the paths start one step to the right and
    /// slide in; an unfinished slide is canceled and its remaining offset added to the new one.
    pub fn update_metrics(&mut self, settings: &ClientSettings, ease: bool, frames: &mut FrameQueue) {
        let mut length = self.width / step_count(settings);
        if let Some(previous) = self.ease.take() {
            frames.cancel(previous.handle);
            length += previous.dx;
        }

        self.paths = self.create_metric_paths(settings);

        if !ease {
            self.draw(0.0);
            return;
        }
        self.ease = Some(Ease {
            handle: frames.request(FrameTarget::Lane(self.kind)),
            length,
            dx: length,
            start: None,
        });
    }

    /// Advances the slide to frame time `now` (milliseconds, any monotonic origin).
    pub fn on_frame(&mut self, now: f64, frames: &mut FrameQueue) {
        let Some(mut ease) = self.ease else {
            return;
        };
        let start = *ease.start.get_or_insert(now);
        let progress = ((now - start) / EASING_MS).clamp(0.0, 1.0);
        let dx = ease.length * (1.0 - progress);
        self.draw(dx);

        if progress >= 1.0 {
            self.ease = None;
        } else {
            ease.dx = dx;
            ease.handle = frames.request(FrameTarget::Lane(self.kind));
            self.ease = Some(ease);
        }
    }

    pub fn cancel_animation(&mut self, frames: &mut FrameQueue) {
        if let Some(ease) = self.ease.take() {
            frames.cancel(ease.handle);
        }
    }

    /// Maps pointer position `x` to a step index counted back from the newest point. Returns
    /// whether the hovered index changed.
    pub fn pointer_move(&mut self, x: f64, settings: &ClientSettings) -> bool {
        let related = settings.enabled_of(self.kind);
        let Some(first) = related.first() else {
            return false;
        };
        let steps = step_count(settings);
        let fraction = if self.width > 0.0 { x / self.width } else { 1.0 };
        let back = ((1.0 - fraction) * steps).round().max(0.0) as u64;
        let index = first.index().saturating_sub(back);
        if self.hovered_index == Some(index) {
            return false;
        }
        self.hovered_index = Some(index);
        self.hovered_time = first.value_at(index).map(|p| p.time);
        if self.ease.is_none() {
            self.draw(0.0);
        }
        true
    }

    /// Drops the hover; redraws at once unless a slide will draw the next frame anyway.
    pub fn clear_hover(&mut self) -> bool {
        if self.hovered_index.is_none() {
            return false;
        }
        self.hovered_index = None;
        self.hovered_time = None;
        if self.ease.is_none() {
            self.draw(0.0);
        }
        true
    }

    /// X position of the hover line, if hovering with data in this lane.
    pub fn hover_line_x(&self, settings: &ClientSettings) -> Option<f64> {
        let hovered = self.hovered_index?;
        let related = settings.enabled_of(self.kind);
        let first = related.first()?;
        let step = self.width / step_count(settings);
        Some(self.width - first.index().saturating_sub(hovered) as f64 * step)
    }

    /// SVG group for this lane, placed `top` pixels down.
    pub fn render_svg(&self, settings: &ClientSettings, top: f64) -> String {
        let palette = settings.palette();
        let mut out = String::new();
        let _ = write!(
            out,
            r#"<g class="lane {}" transform="translate(0,{})">"#,
            self.kind.as_str(),
            top
        );
        let _ = write!(
            out,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
            self.rulers.to_svg_data(),
            palette.border,
            RULER_WIDTH
        );
        let _ = write!(out, r#"<g transform="translate({:.2},0)">"#, self.offset);
        if let Some(x) = self.hover_line_x(settings) {
            let _ = write!(
                out,
                r#"<line x1="{x:.2}" y1="0" x2="{x:.2}" y2="{:.2}" stroke="{}"/>"#,
                self.height, palette.border
            );
        }
        // Fills first so every line stays on top.
        for series in &self.paths {
            let _ = write!(
                out,
                r#"<path d="{}" fill="{}" fill-opacity="0.1" stroke="none"/>"#,
                series.path.to_svg_data(),
                series.color
            );
        }
        for series in &self.paths {
            let _ = write!(
                out,
                r#"<path d="{}" fill="none" stroke="{}" stroke-width="{}"/>"#,
                series.path.to_svg_data(),
                series.color,
                LINE_WIDTH
            );
        }
        out.push_str("</g></g>");
        out
    }

    fn draw(&mut self, dx: f64) {
        self.offset = dx;
        self.draws += 1;
    }

    fn create_rulers(&self) -> Path {
        let mut path = Path::new();
        let step = self.height / RULERS as f64;
        let mut y = step;
        for _ in 0..RULERS {
            let target = y.floor() - RULER_WIDTH / 2.0;
            path.move_to(0.0, target);
            path.line_to(self.width, target);
            y += step;
        }
        path
    }

    /// Builds every enabled series of this lane against one shared scale. The scale only grows
    /// within a pass; if a later series raised it, the pass is repeated so earlier paths use it.
    fn create_metric_paths(&mut self, settings: &ClientSettings) -> Vec<SeriesPath> {
        let metrics = settings.enabled_of(self.kind);
        let mut scale = 0.0f64;
        let mut paths = Vec::new();
        for _ in 0..MAX_PATH_PASSES {
            let mut first_scale = None;
            paths = metrics
                .iter()
                .map(|metric| {
                    scale = scale.max(metric.max_y());
                    if first_scale.is_none() {
                        first_scale = Some(scale);
                    }
                    SeriesPath {
                        key: metric.key().clone(),
                        color: settings.metric_color(metric.key()).to_string(),
                        path: self.create_metric_path(metric, scale, settings),
                    }
                })
                .collect();
            if first_scale.is_none_or(|first| first == scale) {
                break;
            }
        }
        self.scale = scale;
        paths
    }

    /// Newest value at the right edge, one step per point leftwards, closed along the baseline.
    fn create_metric_path(&self, metric: &Metric, max_y: f64, settings: &ClientSettings) -> Path {
        let width = self.width;
        let base = self.height - LINE_WIDTH / 2.0;
        let step = width / step_count(settings);
        let y = |value: f64| {
            let ratio = if max_y > 0.0 { 1.0 - value / max_y } else { 1.0 };
            base * ratio.clamp(0.0, 1.0)
        };

        let mut path = Path::new();
        let values = metric.values();
        let Some((&newest, older)) = values.split_last() else {
            path.move_to(0.0, base);
            path.line_to(width, base);
            return path;
        };

        let mut x = width;
        path.move_to(x, y(newest));
        for &value in older.iter().rev() {
            x -= step;
            path.line_to(x, y(value));
        }
        path.line_to(x - step, base);
        path.line_to(-step, base);
        path.line_to(width, base);
        path
    }
}

fn step_count(settings: &ClientSettings) -> f64 {
    settings.steps().max(1) as f64
}
