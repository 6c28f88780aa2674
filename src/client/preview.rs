// Headless UI context in its own task, rendered on demand for GET /api/chart.svg

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, Instant, interval};

use super::context::UiContext;
use crate::supervisor::SupervisorHandle;

/// Roughly one display refresh.
const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const REQUEST_QUEUE_CAPACITY: usize = 8;

pub struct PreviewConfig {
    pub width: f64,
    pub height: f64,
}

enum PreviewRequest {
    Render(oneshot::Sender<String>),
    Resize { width: f64, height: f64 },
}

#[derive(Clone)]
pub struct PreviewHandle {
    tx: mpsc::Sender<PreviewRequest>,
}

impl PreviewHandle {
    /// Current chart as an SVG document, or `None` if the preview task is gone.
    pub async fn render(&self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(PreviewRequest::Render(reply)).await.ok()?;
        rx.await.ok()
    }

    pub async fn resize(&self, width: f64, height: f64) {
        if self
            .tx
            .send(PreviewRequest::Resize { width, height })
            .await
            .is_err()
        {
            tracing::debug!("preview task is gone");
        }
    }
}

/// Spawns the preview. It registers as a headless UI client and runs until the supervisor closes
/// its queue or every handle is dropped.
pub fn spawn(
    supervisor: SupervisorHandle,
    config: PreviewConfig,
) -> (PreviewHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut requests) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
    let handle = tokio::spawn(async move {
        let Some((id, mut messages)) = supervisor.register_headless_client().await else {
            tracing::warn!("preview could not register with the supervisor");
            return;
        };
        tracing::debug!(client = id, "preview context started");
        let mut context = UiContext::new(config.width, config.height);
        let started = Instant::now();
        let mut frame_tick = interval(FRAME_INTERVAL);
        frame_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                message = messages.recv() => match message {
                    Some(message) => {
                        context.handle_message(message);
                        for outgoing in context.take_outbox() {
                            supervisor.client_message(id, outgoing);
                        }
                    }
                    None => break,
                },
                _ = frame_tick.tick(), if context.has_pending_frames() => {
                    context.run_frame(started.elapsed().as_secs_f64() * 1000.0);
                }
                request = requests.recv() => match request {
                    Some(PreviewRequest::Render(reply)) => {
                        let _ = reply.send(context.render_svg());
                    }
                    Some(PreviewRequest::Resize { width, height }) => context.resize(width, height),
                    None => break,
                },
            }
        }
        context.dispose();
        supervisor.unregister_client(id);
        tracing::debug!(client = id, "preview context stopped");
    });
    (PreviewHandle { tx }, handle)
}
