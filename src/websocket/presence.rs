use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::ids::FlatId;
use crate::session::AuthSession;
use crate::state::AppState;
use crate::websocket::presence_registry::{next_conn_id, BroadcastStartResult};
use crate::websocket::{coerce_bool, coerce_mic_level, frame_type, parse_frame};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_presence(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: AuthSession,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, session.flat_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr, session_flat_id: String) {
    let conn_id = next_conn_id();
    let session_flat_id = FlatId::canonicalize(&session_flat_id);
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state
        .presence
        .insert_client(conn_id, addr.ip().to_string(), tx)
        .await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            outgoing = rx.recv() => {
                match outgoing {
                    Some(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_frame(&state, conn_id, &session_flat_id, &text).await {
                            if sink.send(Message::Text(reply.to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    break;
                }
                awaiting_pong = true;
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.presence.remove_client(conn_id).await;
}

async fn handle_frame(
    state: &AppState,
    conn_id: u64,
    session_flat_id: &FlatId,
    text: &str,
) -> Option<serde_json::Value> {
    let frame = parse_frame(text)?;

    match frame_type(&frame) {
        "identify" => {
            // The message's flat_id must match the session that authorized
            // this connection (spec: WS upgrades require a session whose
            // flat_id matches the id used in messages) — a mismatch is
            // dropped like any other unauthorized frame.
            if let Some(flat_id) = frame.get("flat_id").and_then(|v| v.as_str()) {
                let canonical = FlatId::canonicalize(flat_id);
                if &canonical == session_flat_id {
                    state.presence.identify(conn_id, canonical).await;
                }
            }
            None
        }
        "broadcast:start" => match state.presence.broadcast_start(conn_id).await {
            Some(BroadcastStartResult::AlreadyBroadcasting) => {
                Some(json!({"type":"broadcast:denied","reason":"ALREADY_BROADCASTING"}))
            }
            _ => None,
        },
        "broadcast:stop" => {
            state.presence.broadcast_stop(conn_id).await;
            None
        }
        "broadcast:status" => {
            let mic_on = coerce_bool(&frame, "micOn");
            let sys_on = coerce_bool(&frame, "sysOn");
            let ptt = coerce_bool(&frame, "ptt");
            let speaking = coerce_bool(&frame, "speaking");
            let mic_level = coerce_mic_level(&frame, "micLevel");
            state
                .presence
                .broadcast_status(conn_id, mic_on, sys_on, ptt, speaking, mic_level)
                .await;
            None
        }
        "listen:start" => {
            if let Some(target) = frame.get("targetFlat").and_then(|v| v.as_str()) {
                state.presence.listen_start(conn_id, FlatId::canonicalize(target)).await;
            }
            None
        }
        "listen:stop" => {
            state.presence.listen_stop(conn_id).await;
            None
        }
        _ => None,
    }
}
