// WebSocket handlers: UI clients (/ws/realtime) and the notebook host bridge (/ws/host)

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::kernel::bridge::HostBridge;
use crate::models::{FromClientMessage, FromHostMessage};
use crate::supervisor::SupervisorHandle;

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Decrements the realtime connection count on drop (connect = +1, drop = -1).
struct WsConnectionGuard(Arc<AtomicUsize>);

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(super) async fn ws_realtime(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let supervisor = state.supervisor.clone();
    let conn_count = state.ws_realtime_connections.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_realtime(socket, supervisor, conn_count).await {
            tracing::info!("Realtime stream error: {}", e);
        }
    })
}

async fn stream_realtime(
    socket: WebSocket,
    supervisor: SupervisorHandle,
    conn_count: Arc<AtomicUsize>,
) -> anyhow::Result<()> {
    conn_count.fetch_add(1, Ordering::Relaxed);
    let _guard = WsConnectionGuard(conn_count);
    let Some((id, mut rx)) = supervisor.register_client(true).await else {
        return Ok(());
    };
    tracing::info!(client = id, "Client connected to realtime stream");

    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let result = async {
        loop {
            tokio::select! {
                message = rx.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    let json = serde_json::to_string(&message)?;
                    let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(json.into()))).await;
                    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                        break;
                    }
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<FromClientMessage>(text.as_str()) {
                            Ok(message) => supervisor.client_message(id, message),
                            Err(e) => tracing::debug!(client = id, error = %e, "ignoring malformed client message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                _ = ping_interval.tick() => {
                    let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Ping(Bytes::new()))).await;
                    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                        break;
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    supervisor.unregister_client(id);
    tracing::info!(client = id, "Client disconnected from realtime stream");
    result
}

pub(super) async fn ws_host(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let supervisor = state.supervisor.clone();
    let bridge = state.bridge.clone();
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = stream_host(socket, bridge, supervisor).await {
            tracing::info!("Host stream error: {}", e);
        }
    })
}

async fn stream_host(
    socket: WebSocket,
    bridge: Arc<HostBridge>,
    supervisor: SupervisorHandle,
) -> anyhow::Result<()> {
    let (connection, mut outbound) = bridge.connect();
    let (mut sender, mut receiver) = socket.split();
    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let result = async {
        loop {
            tokio::select! {
                request = outbound.recv() => {
                    // A newer host connection replaced this one.
                    let Some(request) = request else {
                        break;
                    };
                    let json = serde_json::to_string(&request)?;
                    let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Text(json.into()))).await;
                    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                        break;
                    }
                }
                incoming = receiver.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<FromHostMessage>(text.as_str()) {
                            Ok(message) => {
                                if let Some(event) = bridge.handle_message(message) {
                                    supervisor.host_event(event);
                                }
                            }
                            Err(e) => tracing::debug!(connection, error = %e, "ignoring malformed host message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                },
                _ = ping_interval.tick() => {
                    let r = timeout(WS_SEND_TIMEOUT, sender.send(Message::Ping(Bytes::new()))).await;
                    if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                        break;
                    }
                }
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    bridge.disconnect(connection);
    result
}
