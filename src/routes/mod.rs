// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tower_http::cors::{Any, CorsLayer};

use crate::client::PreviewHandle;
use crate::config::AppConfig;
use crate::kernel::bridge::HostBridge;
use crate::supervisor::SupervisorHandle;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) supervisor: SupervisorHandle,
    pub(crate) bridge: Arc<HostBridge>,
    pub(crate) preview: Option<PreviewHandle>,
    pub(crate) ws_realtime_connections: Arc<AtomicUsize>,
    pub(crate) config: AppConfig,
}

pub fn app(
    supervisor: SupervisorHandle,
    bridge: Arc<HostBridge>,
    preview: Option<PreviewHandle>,
    ws_realtime_connections: Arc<AtomicUsize>,
    config: AppConfig,
) -> Router {
    let state = AppState {
        supervisor,
        bridge,
        preview,
        ws_realtime_connections,
        config,
    };
    Router::new()
        .route("/", get(|| async { "kernelmon: notebook kernel resource monitor" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/settings", get(http::settings_handler)) // GET /api/settings
        .route("/api/toggle/cpu", post(http::toggle_cpu_handler)) // POST /api/toggle/cpu
        .route("/api/toggle/memory", post(http::toggle_memory_handler)) // POST /api/toggle/memory
        .route("/api/chart.svg", get(http::chart_svg_handler)) // GET /api/chart.svg
        .route("/ws/realtime", get(ws::ws_realtime)) // WS /ws/realtime
        .route("/ws/host", get(ws::ws_host)) // WS /ws/host
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
