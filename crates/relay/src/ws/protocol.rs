use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};

use super::session::MAX_FRAME_BYTES;

pub async fn send_text(socket: &mut WebSocket, payload: String) -> Result<(), axum::Error> {
    socket.send(Message::Text(payload.into())).await
}

pub fn frame_size_exceeded_reason() -> String {
    format!("websocket frame exceeds maximum size of {MAX_FRAME_BYTES} bytes")
}

pub fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: String) {
    let _ = socket.send(Message::Close(Some(CloseFrame { code, reason: reason.into() }))).await;
}

pub async fn close_frame_too_large(socket: &mut WebSocket) {
    close_with(socket, close_code::SIZE, frame_size_exceeded_reason()).await;
}

pub async fn close_protocol_error(socket: &mut WebSocket, reason: impl Into<String>) {
    close_with(socket, close_code::PROTOCOL, reason.into()).await;
}
