//! WebSocket endpoint: snapshot on connect, inbound commands, state push
//!
//! Clients authenticate with a `token` query parameter at connect time; a
//! bad token gets a policy-violation close instead of a handshake error so
//! browsers surface a clean close event.

use std::borrow::Cow;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::cues::{now_ms, CueController};

use super::{cue_message, snapshot_message, ApiState};

/// Policy-violation close code sent on auth failure.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>, token: Option<String>) {
    if !super::auth::token_matches(&state.config.auth_token, token.as_deref().unwrap_or("")) {
        warn!("🔐 WS connection rejected (invalid token)");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: Cow::from("unauthorized"),
            })))
            .await;
        return;
    }

    let (client, mut rx) = state.broadcaster.subscribe(now_ms());
    info!("🔌 WS client #{} connected", client.id());

    // Full snapshot first, so the client renders without waiting for a change.
    let snapshot = state.controller.lock().snapshot();
    if socket
        .send(Message::Text(snapshot_message(&snapshot).to_string()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            // Forward state changes to this client
            result = rx.recv() => {
                match result {
                    Ok(cue) => {
                        if socket.send(Message::Text(cue_message(&cue).to_string())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(n)) => {
                        warn!("⚠️  WS client #{} lagged by {} events", client.id(), n);
                    }
                }
            }
            // Handle inbound commands
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&state.controller, &text) {
                            if socket.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol.
                    }
                    Some(Err(e)) => {
                        warn!("⚠️  WS client #{} error: {}", client.id(), e);
                        break;
                    }
                }
            }
        }
    }

    info!("❌ WS client #{} disconnected", client.id());
}

/// Dispatch one inbound message. Returns the direct reply for this client,
/// if any; state changes reach everyone through the broadcast instead.
fn handle_client_message(controller: &Mutex<CueController>, text: &str) -> Option<Value> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            debug!("invalid WS JSON: {}", text);
            return Some(error_message("invalid_json"));
        }
    };

    // A message without a type is treated as a trigger; a missing index
    // addresses channel 0.
    let action = value.get("type").and_then(Value::as_str).unwrap_or("trigger");
    let index = value
        .get("cue")
        .or_else(|| value.get("index"))
        .and_then(Value::as_i64)
        .unwrap_or(0);

    let count = controller.lock().cue_count();
    if index < 0 || index as usize >= count {
        return Some(error_message("invalid_cue"));
    }
    let index = index as usize;

    let persist = value.get("persist").and_then(Value::as_bool).unwrap_or(true);
    if let Some(new_text) = value.get("text").and_then(Value::as_str) {
        controller.lock().set_text(index, new_text, persist);
    }

    match action {
        "setText" => {
            let controller = controller.lock();
            controller.cue_state(index).map(|s| cue_message(&s))
        }
        "trigger" => {
            controller.lock().trigger(index, now_ms());
            None
        }
        "ping" => Some(json!({ "type": "pong" })),
        _ => None,
    }
}

fn error_message(message: &str) -> Value {
    json!({ "type": "error", "message": message })
}
