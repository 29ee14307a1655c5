//! WebSocket upgrade handler for the per-participant call channel.
//!
//! `GET /api/calls/{session_id}/ws?token=…&call_id=…` upgrades to the
//! participant's bidirectional channel: binary frames carry PCM audio
//! (client → server capture, server → client dubbed output) and text
//! frames carry the JSON control messages of `voxbridge_core::protocol`.
//!
//! ## Protocol
//!
//! | Direction | Format | Content |
//! |---|---|---|
//! | Client → Server | Binary, ≤ 16 000 bytes | PCM16 LE capture frame (100 ms nominal) |
//! | Server → Client | Binary, variable | PCM16 LE dubbed audio for this listener |
//! | Client → Server | Text | `ping` / `mute` / `unmute` / `leave` |
//! | Server → Client | Text | captions, translations, call events |
//!
//! ## Lifecycle
//!
//! 1. The upgrade completes first; admission runs on the open socket so
//!    every rejection can use its close reason (`unauthenticated`,
//!    `unauthorized`, `unknown_session`, `superseded`, `slow_consumer`,
//!    `call_ended`).
//! 2. On admission the handler splits the socket and spawns two tasks:
//!    * **Reader** — binary frames go straight into the speaker's bounded
//!      segmenter queue (overflow drops newest, counted); text frames
//!      parse into client verbs for the hub's control channel. Unknown
//!      verbs get an `error` reply and are otherwise ignored.
//!    * **Writer** — drains the listener's outbound queue; a queued
//!      `Close` marker emits the close frame and ends the connection.
//! 3. Whichever task finishes first decides the shutdown: a finished
//!    reader notifies the hub and gives the writer a grace period to
//!    flush; a finished writer (session over, superseded) stops the
//!    reader.

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use voxbridge_core::protocol::MAX_FRAME_BYTES;
use voxbridge_core::{ClientMessage, CloseReason, ServerMessage, SessionId, metrics as metric_names};

use crate::hub::{HubCommand, JoinAccepted};
use crate::outbound::{Outbound, OutboundQueue, OutboundReceiver};
use crate::state::AppState;

/// Admission query parameters.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Opaque bearer token resolved by the authorizer.
    pub token: String,
    /// Must match the session id in the path.
    pub call_id: String,
}

/// `GET /api/calls/{session_id}/ws` — upgrade to the call channel.
pub async fn call_ws(
    ws: WebSocketUpgrade,
    Path(session_id): Path<String>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        handle_call_socket(socket, state, SessionId::new(session_id), params)
    })
}

async fn handle_call_socket(
    socket: WebSocket,
    state: AppState,
    session_id: SessionId,
    params: WsParams,
) {
    // ── Admission ────────────────────────────────────────────────────
    let Some(user) = state.authorizer.authenticate(&params.token).await else {
        close_with(socket, CloseReason::Unauthenticated).await;
        return;
    };
    if params.call_id != session_id.as_str() {
        close_with(socket, CloseReason::Unauthorized).await;
        return;
    }

    let (queue, outbound_rx) = OutboundQueue::new(state.settings.outbound_queue_messages);
    let accepted = match state.hub.join(&session_id, user, queue.clone()).await {
        Ok(accepted) => accepted,
        Err(reason) => {
            debug!(session = %session_id, reason = %reason, "admission rejected");
            close_with(socket, reason).await;
            return;
        }
    };

    debug!(session = %session_id, user = %accepted.user, conn_id = accepted.conn_id,
           "call channel open");

    // ── Reader / writer split ────────────────────────────────────────
    let (ws_tx, ws_rx) = socket.split();
    let mut writer = tokio::spawn(write_loop(ws_tx, outbound_rx));
    let mut reader = tokio::spawn(read_loop(ws_rx, queue, accepted));

    tokio::select! {
        _ = &mut reader => {
            // Client went away (or left). The hub closes the outbound
            // queue during departure; give the writer the grace period to
            // flush any call_ended notice, then stop it.
            let grace = Duration::from_millis(state.settings.teardown_grace_ms);
            if tokio::time::timeout(grace, &mut writer).await.is_err() {
                writer.abort();
            }
        }
        _ = &mut writer => {
            // Server-side close (session ended, superseded, slow
            // consumer): the close frame is out, stop reading.
            reader.abort();
        }
    }

    debug!(session = %session_id, "call channel closed");
}

/// Ingest loop: binary PCM → segmenter queue, text → hub verbs.
async fn read_loop(mut ws_rx: SplitStream<WebSocket>, queue: OutboundQueue, accepted: JoinAccepted) {
    let JoinAccepted {
        user,
        conn_id,
        frames,
        commands,
    } = accepted;

    while let Some(incoming) = ws_rx.next().await {
        match incoming {
            Ok(Message::Binary(data)) => {
                if data.len() > MAX_FRAME_BYTES {
                    counter!(metric_names::FRAMES_DROPPED, "cause" => "oversized").increment(1);
                    queue.push_control(ServerMessage::Error {
                        error: format!("frame exceeds {MAX_FRAME_BYTES} bytes"),
                    });
                    continue;
                }
                if data.len() % 2 != 0 {
                    // Not valid s16le audio.
                    queue.push_control(ServerMessage::Error {
                        error: "odd-length audio frame".to_string(),
                    });
                    continue;
                }

                match frames.try_send(data) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        // Backpressure: newest frame is dropped, counted.
                        counter!(metric_names::FRAMES_DROPPED, "cause" => "inbound_overflow")
                            .increment(1);
                    }
                    Err(TrySendError::Closed(_)) => {
                        // Segmenter cancelled: the session is over for us.
                        break;
                    }
                }
            }

            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => {
                    let leaving = msg == ClientMessage::Leave;
                    if commands
                        .send(HubCommand::Verb {
                            user: user.clone(),
                            conn_id,
                            msg,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                    if leaving {
                        break;
                    }
                }
                Err(e) => {
                    debug!(user = %user, error = %e, "unparseable client message");
                    queue.push_control(ServerMessage::Error {
                        error: "unknown or malformed message".to_string(),
                    });
                }
            },

            Ok(Message::Close(_)) | Err(_) => break,

            // Transport ping/pong frames are handled by axum.
            Ok(_) => {}
        }
    }

    // Best-effort: the hub ignores this when the connection was already
    // superseded or departed via `leave`.
    let _ = commands
        .send(HubCommand::Disconnected { user, conn_id })
        .await;
}

/// Egress loop: outbound queue → WebSocket frames.
async fn write_loop(mut ws_tx: SplitSink<WebSocket, Message>, mut rx: OutboundReceiver) {
    while let Some(item) = rx.pop().await {
        let sent = match item {
            Outbound::Control(msg) | Outbound::Interim { msg, .. } => {
                send_json(&mut ws_tx, &msg).await
            }

            Outbound::Final { msg, audio } => {
                let mut sent = send_json(&mut ws_tx, &msg).await;
                if sent.is_ok() {
                    if let Some(pcm) = audio {
                        sent = ws_tx.send(Message::Binary(pcm)).await;
                    }
                }
                sent
            }

            Outbound::Close(reason) => {
                let _ = ws_tx
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code_for(reason),
                        reason: reason.as_str().into(),
                    })))
                    .await;
                break;
            }
        };

        if sent.is_err() {
            // Peer hung up mid-write; the reader side notices separately.
            break;
        }
    }
    let _ = ws_tx.close().await;
}

async fn send_json(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize server message");
            Ok(())
        }
    }
}

/// Close an unadmitted socket with an explicit reason.
async fn close_with(mut socket: WebSocket, reason: CloseReason) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code_for(reason),
            reason: reason.as_str().into(),
        })))
        .await;
}

const fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        // Ordinary end of call.
        CloseReason::CallEnded | CloseReason::Superseded => close_code::NORMAL,
        CloseReason::Unauthenticated
        | CloseReason::Unauthorized
        | CloseReason::UnknownSession
        | CloseReason::SlowConsumer => close_code::POLICY,
    }
}
