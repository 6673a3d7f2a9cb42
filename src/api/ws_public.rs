//! Public/spectator WebSocket surface (spec.md §4.F, §4.H):
//! `/api/public/ws/{boxId}` for one box's redacted updates,
//! `/api/public/ws` for the cross-box aggregate.
//!
//! Spectators may only send `REQUEST_STATE`/`PONG`; anything else is
//! silently dropped rather than routed through the dispatcher, since they
//! never hold a `(sessionId, boxVersion)` pair to mutate with.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::time::{interval, Instant as TokioInstant};

use crate::events::AggregateEvent;
use crate::protocol::{Command, CommandKind};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/public/ws/:box_id", get(upgrade_box))
        .route("/api/public/ws", get(upgrade_aggregate))
}

#[derive(Deserialize)]
struct TokenQuery {
    token: String,
}

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_UNAUTHORIZED: u16 = 4401;
const CLOSE_SLOW_CONSUMER: u16 = 4408;
const CLOSE_BOX_REMOVED: u16 = 4409;

async fn upgrade_box(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(box_id): Path<u32>,
    Query(query): Query<TokenQuery>,
) -> Response {
    if !state.auth.validate_spectator(&query.token) {
        return reject(ws, CLOSE_UNAUTHORIZED).await;
    }
    let Some(entry) = state.registry.get(box_id) else {
        return reject(ws, CLOSE_BOX_REMOVED).await;
    };
    ws.on_upgrade(move |socket| run_box_channel(socket, state, box_id, entry))
}

async fn upgrade_aggregate(ws: WebSocketUpgrade, State(state): State<AppState>, Query(query): Query<TokenQuery>) -> Response {
    if !state.auth.validate_spectator(&query.token) {
        return reject(ws, CLOSE_UNAUTHORIZED).await;
    }
    ws.on_upgrade(move |socket| run_aggregate_channel(socket, state))
}

async fn reject(ws: WebSocketUpgrade, code: u16) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame { code, reason: std::borrow::Cow::Borrowed("") })))
            .await;
    })
}

async fn run_box_channel(mut socket: WebSocket, state: AppState, box_id: u32, entry: std::sync::Arc<crate::registry::BoxEntry>) {
    let (sub_id, mut rx) = entry.public_hub.subscribe(crate::auth::Role::Spectator);
    if let Some(snapshot) = state.dispatcher.current_public_snapshot(box_id) {
        if let Ok(json) = serde_json::to_string(&AggregateEvent::BoxStatusUpdate(snapshot)) {
            entry.public_hub.send_to(sub_id, std::sync::Arc::from(json));
        }
    }

    run_readonly_loop(&mut socket, &mut rx, &state, Some(box_id)).await;
    entry.public_hub.unsubscribe(sub_id);
}

async fn run_aggregate_channel(mut socket: WebSocket, state: AppState) {
    let (sub_id, mut rx) = state.registry.aggregate_hub.subscribe(crate::auth::Role::Spectator);
    let boxes = state.dispatcher.all_public_snapshots();
    if let Ok(json) = serde_json::to_string(&AggregateEvent::PublicStateSnapshot { boxes }) {
        state.registry.aggregate_hub.send_to(sub_id, std::sync::Arc::from(json));
    }

    run_readonly_loop(&mut socket, &mut rx, &state, None).await;
    state.registry.aggregate_hub.unsubscribe(sub_id);
}

/// Shared select loop for both public channels: forward broadcast frames,
/// answer `REQUEST_STATE`/`PING` with a direct reply, heartbeat on a fixed
/// interval, and otherwise ignore inbound traffic.
async fn run_readonly_loop(
    socket: &mut WebSocket,
    rx: &mut tokio::sync::mpsc::Receiver<crate::hub::Frame>,
    state: &AppState,
    box_id: Option<u32>,
) {
    let mut last_pong = TokioInstant::now();
    let mut ping_tick = interval(state.heartbeat.ping_interval);

    let close_code = loop {
        tokio::select! {
            frame = rx.recv() => {
                match frame {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.to_string())).await.is_err() {
                            break None;
                        }
                    }
                    None => {
                        // The per-box public hub closes wholesale when its
                        // box is removed; the aggregate hub never is, so a
                        // closed aggregate channel only ever means eviction.
                        let code = if state.registry.is_shutting_down() {
                            CLOSE_NORMAL
                        } else if box_id.is_some_and(|id| state.registry.get(id).is_none()) {
                            CLOSE_BOX_REMOVED
                        } else {
                            CLOSE_SLOW_CONSUMER
                        };
                        break Some(code);
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(command) = serde_json::from_str::<Command>(&text) {
                            match command.kind {
                                CommandKind::Pong => last_pong = TokioInstant::now(),
                                CommandKind::RequestState => {
                                    if let Some(id) = box_id {
                                        if let Some(snapshot) = state.dispatcher.current_public_snapshot(id) {
                                            if let Ok(json) = serde_json::to_string(&AggregateEvent::BoxStatusUpdate(snapshot)) {
                                                if socket.send(Message::Text(json)).await.is_err() {
                                                    break None;
                                                }
                                            }
                                        }
                                    }
                                }
                                _ => {}
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break None,
                }
            }
            _ = ping_tick.tick() => {
                if last_pong.elapsed() > state.heartbeat.pong_timeout {
                    break Some(CLOSE_SLOW_CONSUMER);
                }
                if socket.send(Message::Text(r#"{"type":"PING"}"#.to_string())).await.is_err() {
                    break None;
                }
            }
        }
    };

    if let Some(code) = close_code {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame { code, reason: std::borrow::Cow::Borrowed("") })))
            .await;
    }
}
