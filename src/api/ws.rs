//! Operator WebSocket: `/api/ws/{boxId}` (spec.md §4.E).
//!
//! One task per connection: a select loop between the box hub's outbound
//! queue and inbound client frames, plus an application-level PING/PONG
//! heartbeat. Grounded on the fan-in/fan-out connection-task shape in
//! `other_examples/…unicity-astrid-astrid…inbound_router.rs.rs`.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::time::{interval, Instant as TokioInstant};

use crate::auth::Role;
use crate::protocol::{Command, CommandKind};
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/ws/:box_id", get(upgrade))
}

#[derive(Deserialize)]
struct WsAuthQuery {
    token: Option<String>,
}

const CLOSE_NORMAL: u16 = 1000;
const CLOSE_UNAUTHORIZED: u16 = 4401;
const CLOSE_FORBIDDEN: u16 = 4403;
const CLOSE_SLOW_CONSUMER: u16 = 4408;
const CLOSE_BOX_REMOVED: u16 = 4409;

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(box_id): Path<u32>,
    Query(query): Query<WsAuthQuery>,
) -> Response {
    let Some(token) = query.token else {
        return close_immediately(ws, CLOSE_UNAUTHORIZED).await;
    };
    let claims = match state.auth.validate_operator(&token) {
        Ok(claims) => claims,
        Err(_) => return close_immediately(ws, CLOSE_UNAUTHORIZED).await,
    };
    if !claims.allows(box_id) {
        return close_immediately(ws, CLOSE_FORBIDDEN).await;
    }
    if state.registry.get(box_id).is_none() {
        return close_immediately(ws, CLOSE_BOX_REMOVED).await;
    }

    ws.on_upgrade(move |socket| run_connection(socket, state, box_id, claims.role))
}

/// Upgrade then immediately close with a protocol-level reason, so rejected
/// clients still get a clean WebSocket close frame instead of a bare 4xx
/// (some browsers surface the close code more reliably than the handshake
/// status for this class of client).
async fn close_immediately(ws: WebSocketUpgrade, code: u16) -> Response {
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code,
                reason: std::borrow::Cow::Borrowed(""),
            })))
            .await;
    })
}

async fn run_connection(mut socket: WebSocket, state: AppState, box_id: u32, role: Role) {
    let Some(entry) = state.registry.get(box_id) else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };

    let (sub_id, mut rx) = state.dispatcher.subscribe_with_snapshot(&entry, role);
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
                        // Hub dropped us: a graceful server shutdown (normal
                        // close), this one box being admin-deleted (4409), or
                        // eviction as a slow consumer (4408).
                        let code = if state.registry.is_shutting_down() {
                            CLOSE_NORMAL
                        } else if state.registry.get(box_id).is_none() {
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
                        match handle_inbound(&state, box_id, &text, &mut last_pong).await {
                            InboundOutcome::Continue => {}
                            InboundOutcome::Reply(payload) => {
                                if socket.send(Message::Text(payload)).await.is_err() {
                                    break None;
                                }
                            }
                            InboundOutcome::Close => break None,
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

    entry.hub.unsubscribe(sub_id);
    if let Some(code) = close_code {
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code,
                reason: std::borrow::Cow::Borrowed(""),
            })))
            .await;
    }
}

enum InboundOutcome {
    Continue,
    Reply(String),
    Close,
}

async fn handle_inbound(
    state: &AppState,
    box_id: u32,
    text: &str,
    last_pong: &mut TokioInstant,
) -> InboundOutcome {
    let command: Command = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(_) => return InboundOutcome::Continue,
    };

    match &command.kind {
        CommandKind::Pong => {
            *last_pong = TokioInstant::now();
            InboundOutcome::Continue
        }
        CommandKind::Ping => InboundOutcome::Reply(r#"{"type":"PONG"}"#.to_string()),
        CommandKind::RequestState => match state.dispatcher.current_snapshot(box_id) {
            Some(snapshot) => {
                let frame = crate::events::Event::StateSnapshot { snapshot: Box::new(snapshot), shutdown_reason: None };
                match serde_json::to_string(&frame) {
                    Ok(json) => InboundOutcome::Reply(json),
                    Err(_) => InboundOutcome::Continue,
                }
            }
            None => InboundOutcome::Close,
        },
        _ => {
            // `Ok` is implied by the `STATE_SNAPSHOT` that follows on the
            // hub; `Ignored`/`Error` never broadcast anything (spec.md §7),
            // so without an explicit reply here the caller would see
            // nothing at all — unlike `POST /api/cmd`, which always returns
            // a body.
            match state.dispatcher.dispatch(&command) {
                crate::protocol::CommandResponse::Ok { .. } => InboundOutcome::Continue,
                response => match serde_json::to_string(&response) {
                    Ok(json) => InboundOutcome::Reply(json),
                    Err(_) => InboundOutcome::Continue,
                },
            }
        }
    }
}
