use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::ids::FlatId;
use crate::session::AuthSession;
use crate::state::AppState;
use crate::websocket::signal_registry::{generate_signal_id, IdentifyResult, SignalRole};
use crate::websocket::{frame_type, parse_frame};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn ws_signal(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: AuthSession,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, addr, session.flat_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, addr: SocketAddr, session_flat_id: String) {
    let session_flat_id = FlatId::canonicalize(&session_flat_id);
    let id = generate_signal_id();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state
        .signal
        .insert_client(id.clone(), addr.ip().to_string(), tx)
        .await;

    if sink
        .send(Message::Text(json!({"type":"hello","id": id}).to_string()))
        .await
        .is_err()
    {
        state.signal.remove_client(&id).await;
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
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
                        match handle_frame(&state, &id, &session_flat_id, &text).await {
                            FrameOutcome::None => {}
                            FrameOutcome::Reply(value) => {
                                if sink.send(Message::Text(value.to_string())).await.is_err() {
                                    break;
                                }
                            }
                            FrameOutcome::DenyAndClose(value) => {
                                let _ = sink.send(Message::Text(value.to_string())).await;
                                let _ = sink
                                    .send(Message::Close(Some(CloseFrame {
                                        code: 1008,
                                        reason: "ALREADY_BROADCASTING".into(),
                                    })))
                                    .await;
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

    state.signal.remove_client(&id).await;
}

enum FrameOutcome {
    None,
    Reply(serde_json::Value),
    DenyAndClose(serde_json::Value),
}

async fn handle_frame(
    state: &AppState,
    id: &str,
    session_flat_id: &FlatId,
    text: &str,
) -> FrameOutcome {
    let Some(frame) = parse_frame(text) else {
        return FrameOutcome::None;
    };

    match frame_type(&frame) {
        "identify" => {
            let Some(flat_id) = frame.get("flat_id").and_then(|v| v.as_str()) else {
                return FrameOutcome::None;
            };
            let flat_id = FlatId::canonicalize(flat_id);
            // Same rule as the presence channel: the frame's flat_id must
            // match the session that authorized this connection.
            if &flat_id != session_flat_id {
                return FrameOutcome::None;
            }
            let role = match frame.get("role").and_then(|v| v.as_str()) {
                Some("broadcaster") => SignalRole::Broadcaster,
                _ => SignalRole::Listener,
            };

            match state.signal.identify(id, flat_id, role).await {
                IdentifyResult::Ok => FrameOutcome::None,
                IdentifyResult::AlreadyBroadcasting => FrameOutcome::DenyAndClose(
                    json!({"type":"broadcast:denied","reason":"ALREADY_BROADCASTING"}),
                ),
            }
        }

        "listen:join" => {
            let Some(target) = frame.get("targetFlat").and_then(|v| v.as_str()) else {
                return FrameOutcome::None;
            };
            let target = FlatId::canonicalize(target);

            if !state.presence.station_exists(&target).await {
                return FrameOutcome::Reply(
                    json!({"type":"listen:error","error":"STATION_OFFLINE"}),
                );
            }

            let Some((broadcaster_id, broadcaster_tx)) = state.signal.broadcaster_sender(&target).await
            else {
                return FrameOutcome::Reply(
                    json!({"type":"listen:error","error":"BROADCASTER_SIGNAL_NOT_READY"}),
                );
            };

            state.signal.set_listening_to(id, Some(target.clone())).await;
            let _ = broadcaster_id;
            let _ = broadcaster_tx.send(json!({"type":"listener:join","listenerId": id}).to_string());

            FrameOutcome::Reply(json!({"type":"listen:ok","targetFlat": target.as_str()}))
        }

        "listen:leave" => {
            let Some(target) = state.signal.listening_to(id).await else {
                return FrameOutcome::None;
            };
            if let Some((_, broadcaster_tx)) = state.signal.broadcaster_sender(&target).await {
                let _ = broadcaster_tx.send(json!({"type":"listener:leave","listenerId": id}).to_string());
            }
            state.signal.set_listening_to(id, None).await;
            FrameOutcome::None
        }

        "webrtc:offer" => {
            let (Some(listener_id), Some(sdp)) = (
                frame.get("listenerId").and_then(|v| v.as_str()),
                frame.get("sdp"),
            ) else {
                return FrameOutcome::None;
            };
            if let Some(tx) = state.signal.sender_by_id(listener_id).await {
                let _ = tx.send(json!({"type":"webrtc:offer","from": id, "sdp": sdp}).to_string());
            }
            FrameOutcome::None
        }

        "webrtc:answer" => {
            let (Some(broadcaster_flat), Some(sdp)) = (
                frame.get("broadcasterFlat").and_then(|v| v.as_str()),
                frame.get("sdp"),
            ) else {
                return FrameOutcome::None;
            };
            let target = FlatId::canonicalize(broadcaster_flat);
            if let Some((_, tx)) = state.signal.broadcaster_sender(&target).await {
                let _ = tx.send(json!({"type":"webrtc:answer","listenerId": id, "sdp": sdp}).to_string());
            }
            FrameOutcome::None
        }

        "webrtc:ice" => {
            if let Some(listener_id) = frame.get("listenerId").and_then(|v| v.as_str()) {
                let Some(candidate) = frame.get("candidate") else {
                    return FrameOutcome::None;
                };
                if let Some(tx) = state.signal.sender_by_id(listener_id).await {
                    let _ = tx.send(
                        json!({"type":"webrtc:ice","from": id, "candidate": candidate}).to_string(),
                    );
                }
            } else if let Some(broadcaster_flat) = frame.get("broadcasterFlat").and_then(|v| v.as_str()) {
                let Some(candidate) = frame.get("candidate") else {
                    return FrameOutcome::None;
                };
                let target = FlatId::canonicalize(broadcaster_flat);
                if let Some((_, tx)) = state.signal.broadcaster_sender(&target).await {
                    let _ = tx.send(
                        json!({"type":"webrtc:ice","listenerId": id, "candidate": candidate}).to_string(),
                    );
                }
            }
            FrameOutcome::None
        }

        _ => FrameOutcome::None,
    }
}
