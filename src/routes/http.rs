// GET/POST handlers: version, settings, lane toggles, chart preview

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::models::MetricKind;
use crate::version::{NAME, VERSION};

/// GET /version: returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/settings: current settings snapshot as broadcast to UI clients.
pub(super) async fn settings_handler(State(state): State<AppState>) -> Response {
    match state.supervisor.settings().await {
        Some(settings) => axum::Json(settings).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "supervisor stopped").into_response(),
    }
}

pub(super) async fn toggle_cpu_handler(State(state): State<AppState>) -> StatusCode {
    state.supervisor.toggle(MetricKind::Cpu);
    StatusCode::ACCEPTED
}

pub(super) async fn toggle_memory_handler(State(state): State<AppState>) -> StatusCode {
    state.supervisor.toggle(MetricKind::Memory);
    StatusCode::ACCEPTED
}

/// GET /api/chart.svg: renders the headless preview context.
pub(super) async fn chart_svg_handler(State(state): State<AppState>) -> Response {
    let preview = match &state.preview {
        Some(preview) if state.config.preview.enabled => preview,
        _ => return (StatusCode::SERVICE_UNAVAILABLE, "preview disabled").into_response(),
    };
    match preview.render().await {
        Some(svg) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "preview stopped").into_response(),
    }
}
