// A UI context: consumes supervisor messages, runs frames, answers pointer and resize events

use super::animation::{FrameQueue, FrameTarget};
use super::chart::Chart;
use super::settings::ClientSettings;
use crate::models::{FromClientMessage, ToClientMessage};

/// Everything one UI context owns. Single-threaded: callers feed it messages, pointer events and
/// frame ticks one at a time, and forward [`UiContext::take_outbox`] to the supervisor.
pub struct UiContext {
    settings: ClientSettings,
    chart: Chart,
    frames: FrameQueue,
    outbox: Vec<FromClientMessage>,
}

impl UiContext {
    pub fn new(width: f64, height: f64) -> Self {
        let settings = ClientSettings::new();
        let mut frames = FrameQueue::new();
        let chart = Chart::new(width, height, &settings, &mut frames);
        Self {
            settings,
            chart,
            frames,
            outbox: Vec::new(),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    pub fn chart(&self) -> &Chart {
        &self.chart
    }

    pub fn frames(&self) -> &FrameQueue {
        &self.frames
    }

    pub fn handle_message(&mut self, message: ToClientMessage) {
        match message {
            ToClientMessage::AddData { data } => {
                self.settings.ingest(&data);
                self.update_metrics();
            }
            ToClientMessage::BatchAddData { data } => {
                for sample in &data {
                    self.settings.ingest(sample);
                }
                self.update_metrics();
            }
            ToClientMessage::UpdateSettings { settings } => {
                self.settings.update(settings);
                self.chart.apply_settings(&self.settings, &mut self.frames);
            }
            ToClientMessage::ApplyData { .. } => {
                self.update_metrics();
                self.refresh_size();
            }
            ToClientMessage::ClearData => {
                self.settings.clear_data();
                self.update_metrics();
                self.refresh_size();
            }
        }
    }

    /// Runs every frame callback due at frame time `now` (milliseconds).
    pub fn run_frame(&mut self, now: f64) {
        for (_, target) in self.frames.take_due() {
            match target {
                FrameTarget::Lane(kind) => self.chart.on_frame(kind, now, &mut self.frames),
            }
        }
    }

    pub fn has_pending_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn pointer_move(&mut self, x: f64) {
        self.chart.pointer_move(x, &self.settings);
    }

    pub fn pointer_leave(&mut self) {
        self.chart.pointer_leave(&self.settings);
    }

    pub fn resize(&mut self, width: f64, height: f64) {
        self.chart
            .update_size(width, height, &self.settings, &mut self.frames);
    }

    pub fn toggle_configuration(&mut self, open: Option<bool>) {
        self.chart
            .toggle_configuration(open, &self.settings, &mut self.frames);
    }

    /// Picker click on a subject's row.
    pub fn toggle_metric(&mut self, notebook: &str) {
        if let Some(message) = self.settings.toggle_metric(notebook) {
            self.outbox.push(message);
        }
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.outbox.push(FromClientMessage::SetVisibility { visible });
    }

    /// Messages for the supervisor queued since the last call.
    pub fn take_outbox(&mut self) -> Vec<FromClientMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn render_svg(&self) -> String {
        self.chart.render_svg(&self.settings)
    }

    pub fn dispose(&mut self) {
        self.chart.cancel_animations(&mut self.frames);
    }

    fn update_metrics(&mut self) {
        if let Some(message) = self.chart.update_metrics(&self.settings, &mut self.frames) {
            self.outbox.push(message);
        }
    }

    fn refresh_size(&mut self) {
        let (width, height) = self.chart.size();
        self.resize(width, height);
    }
}
