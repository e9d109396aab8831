use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use coedit_common::protocol::frames::{decode_inbound, FrameError, InboundFrame};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol as ws_protocol;
use super::session::MAX_FRAME_BYTES;
use crate::error::{current_request_id, request_id_from_headers_or_generate, with_request_id_scope};
use crate::hub::{CollabHub, EditRoute, RegisterOutcome};
use crate::ot::{OtEngine, OtRelay};

#[derive(Clone)]
pub struct WsState {
    pub hub: CollabHub,
    pub engine: Arc<dyn OtEngine>,
}

/// What happened to one inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Registered(RegisterOutcome),
    Forwarded,
    /// Dropped because the bound document is locked.
    Locked,
    /// The engine stopped reading this relay.
    EngineUnavailable,
}

pub fn router(hub: CollabHub, engine: Arc<dyn OtEngine>) -> Router {
    Router::new().route("/ws", get(ws_upgrade)).with_state(WsState { hub, engine })
}

pub async fn ws_upgrade(
    State(state): State<WsState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let request_id = request_id_from_headers_or_generate(&headers);
    ws.max_frame_size(MAX_FRAME_BYTES).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, Uuid::new_v4(), socket)).await;
        },
    )
}

/// Applies one inbound text frame: registration goes to the hub, anything
/// else is relayed to the engine unless the document is locked.
pub async fn handle_text_frame(
    hub: &CollabHub,
    relay: &OtRelay,
    session_id: Uuid,
    raw: &str,
) -> Result<FrameOutcome, FrameError> {
    match decode_inbound(raw)? {
        InboundFrame::Registration(registration) => {
            Ok(FrameOutcome::Registered(hub.register(session_id, registration).await))
        }
        InboundFrame::Edit => match hub.route_edit(session_id).await {
            EditRoute::Locked => Ok(FrameOutcome::Locked),
            EditRoute::Forward if relay.forward(raw.to_owned()) => Ok(FrameOutcome::Forwarded),
            EditRoute::Forward => Ok(FrameOutcome::EngineUnavailable),
        },
    }
}

fn protocol_error_reason(error: &FrameError) -> &'static str {
    match error {
        FrameError::Malformed(_) => "frame is not valid JSON",
        FrameError::InvalidRegistration(_) => "invalid registration frame",
    }
}

async fn handle_socket(state: WsState, session_id: Uuid, mut socket: WebSocket) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let WsState { hub, engine } = state;

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<String>();
    hub.connect(session_id, outbound_sender).await;
    let mut relay = engine.open(session_id);
    let mut engine_open = true;
    debug!(session_id = %session_id, request_id = %request_id, "session connected");

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                let Some(payload) = maybe_outbound else {
                    break;
                };
                if ws_protocol::send_text(&mut socket, payload).await.is_err() {
                    break;
                }
            }
            maybe_engine_frame = relay.recv(), if engine_open => {
                match maybe_engine_frame {
                    Some(frame) => {
                        if ws_protocol::send_text(&mut socket, frame).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        warn!(session_id = %session_id, "OT engine closed its relay");
                        engine_open = false;
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if raw_message.len() > MAX_FRAME_BYTES {
                            ws_protocol::close_frame_too_large(&mut socket).await;
                            break;
                        }

                        match handle_text_frame(&hub, &relay, session_id, raw_message.as_str()).await {
                            Ok(FrameOutcome::EngineUnavailable) => {
                                warn!(session_id = %session_id, "dropping edit, OT engine unavailable");
                            }
                            Ok(outcome) => {
                                debug!(session_id = %session_id, ?outcome, "frame handled");
                            }
                            Err(error) => {
                                warn!(
                                    session_id = %session_id,
                                    request_id = %request_id,
                                    error = %error,
                                    "closing session on protocol error"
                                );
                                ws_protocol::close_protocol_error(
                                    &mut socket,
                                    protocol_error_reason(&error),
                                )
                                .await;
                                break;
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        warn!(session_id = %session_id, "closing session on binary frame");
                        ws_protocol::close_protocol_error(&mut socket, "binary frames are not supported")
                            .await;
                        break;
                    }
                    // Pong replies are queued by the transport itself.
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Ok(Message::Close(_)) => break,
                    Err(error) if ws_protocol::is_frame_size_violation(&error) => {
                        warn!(session_id = %session_id, "closing session on oversized frame");
                        ws_protocol::close_frame_too_large(&mut socket).await;
                        break;
                    }
                    Err(error) => {
                        debug!(session_id = %session_id, error = %error, "socket read failed");
                        break;
                    }
                }
            }
        }
    }

    hub.disconnect(session_id).await;
    relay.end();
    debug!(session_id = %session_id, request_id = %request_id, "session ended");
}
