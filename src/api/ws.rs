// ── API: Terminal WebSocket ────────────────────────────────────────────────
// One socket = one client. Frames are JSON `{event, data}` pairs:
//
//   client → server: terminal:start, terminal:input, terminal:resize,
//                    terminal:stop
//   server → client: terminal:ready, terminal:data, terminal:exit,
//                    terminal:error
//
// Session events arrive over an unbounded channel fed by the terminal
// manager's pump tasks; the select loop interleaves them with client
// frames. Closing the socket tears down every session it owns.

use super::AppState;
use crate::engine::sandbox::terminal::{TerminalEvent, TerminalEventSender};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub async fn terminal_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let socket_id = uuid::Uuid::new_v4().to_string();
    info!("[ws] socket {} connected", socket_id);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<TerminalEvent>();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = events_rx.recv() => {
                // Senders live in the manager; the channel cannot close
                // while this task holds events_tx, but be defensive.
                let Some(event) = event else { break };
                if sender.send(Message::Text(event_frame(&event).to_string())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state, &socket_id, &events_tx, &text).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Binary frames are raw input for the single session
                        // case; clients with several sessions use text frames.
                        if let Err(e) = forward_binary(&state, &socket_id, &bytes).await {
                            send_error(&events_tx, None, &e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong handled by axum
                    Some(Err(e)) => {
                        warn!("[ws] socket {} error: {}", socket_id, e);
                        break;
                    }
                }
            }
        }
    }

    state.terminals.disconnect(&socket_id).await;
    info!("[ws] socket {} disconnected", socket_id);
}

/// Binary frame fallback: route to the socket's only session.
async fn forward_binary(state: &AppState, socket_id: &str, bytes: &[u8]) -> Result<(), String> {
    let session_id = state
        .terminals
        .only_session_of(socket_id)
        .ok_or_else(|| "binary input needs exactly one active session".to_string())?;
    state.terminals.write_input(&session_id, bytes).await.map_err(|e| e.to_string())
}

async fn handle_client_frame(
    state: &AppState,
    socket_id: &str,
    events_tx: &TerminalEventSender,
    text: &str,
) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            send_error(events_tx, None, "malformed frame");
            return;
        }
    };
    let event = frame["event"].as_str().unwrap_or_default();
    let data = &frame["data"];

    match event {
        "terminal:start" => {
            let project_id = data["projectId"].as_str().unwrap_or("default");
            let user_id = data["userId"].as_str().unwrap_or("anonymous");
            let language = data["language"].as_str().unwrap_or("");
            if let Err(e) = state
                .terminals
                .start(socket_id, project_id, user_id, language, events_tx.clone())
                .await
            {
                send_error(events_tx, None, &e.to_string());
            }
        }
        "terminal:input" => {
            let Some(session_id) = data["sessionId"].as_str() else {
                send_error(events_tx, None, "terminal:input needs sessionId");
                return;
            };
            let bytes = input_bytes(&data["input"]);
            if let Err(e) = state.terminals.write_input(session_id, &bytes).await {
                send_error(events_tx, Some(session_id), &e.to_string());
            }
        }
        "terminal:resize" => {
            let Some(session_id) = data["sessionId"].as_str() else { return };
            let cols = data["cols"].as_f64().unwrap_or(f64::NAN);
            let rows = data["rows"].as_f64().unwrap_or(f64::NAN);
            if let Err(e) = state.terminals.resize(session_id, cols, rows).await {
                send_error(events_tx, Some(session_id), &e.to_string());
            }
        }
        "terminal:stop" => {
            let Some(session_id) = data["sessionId"].as_str() else { return };
            if let Err(e) = state.terminals.stop(session_id).await {
                send_error(events_tx, Some(session_id), &e.to_string());
            }
        }
        other => send_error(events_tx, None, &format!("unknown event '{other}'")),
    }
}

/// Input payloads may be a string or an array of byte values (binary input,
/// Ctrl-C included, survives JSON that way).
fn input_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::String(s) => s.clone().into_bytes(),
        Value::Array(items) => {
            items.iter().filter_map(|v| v.as_u64()).map(|b| (b & 0xFF) as u8).collect()
        }
        _ => Vec::new(),
    }
}

fn event_frame(event: &TerminalEvent) -> Value {
    match event {
        TerminalEvent::Ready { session_id } => {
            json!({ "event": "terminal:ready", "data": { "sessionId": session_id } })
        }
        TerminalEvent::Data { session_id, chunk } => json!({
            "event": "terminal:data",
            "data": { "sessionId": session_id, "chunk": String::from_utf8_lossy(chunk) }
        }),
        TerminalEvent::Exit { session_id, code, reason } => json!({
            "event": "terminal:exit",
            "data": { "sessionId": session_id, "code": code, "reason": reason }
        }),
        TerminalEvent::Error { session_id, message } => json!({
            "event": "terminal:error",
            "data": { "sessionId": session_id, "message": message }
        }),
    }
}

fn send_error(events_tx: &TerminalEventSender, session_id: Option<&str>, message: &str) {
    let _ = events_tx.send(TerminalEvent::Error {
        session_id: session_id.unwrap_or_default().to_string(),
        message: message.to_string(),
    });
}
