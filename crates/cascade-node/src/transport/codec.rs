//! Decode-once codec shared by both ends of a tunnel.
//!
//! Server-side (axum) and client-side (tungstenite) sockets yield different
//! message types; both are normalized into `Frame` first, then text/binary
//! payloads are decoded into envelopes in one place.

use axum::extract::ws::Message as AxumMessage;
use bytes::Bytes;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use cascade_core::error::Result;
use cascade_core::protocol::{self, Envelope};

/// Transport-neutral WebSocket message.
#[derive(Debug)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl From<AxumMessage> for Frame {
    fn from(msg: AxumMessage) -> Self {
        match msg {
            AxumMessage::Text(s) => Frame::Text(s),
            AxumMessage::Binary(b) => Frame::Binary(Bytes::from(b)),
            AxumMessage::Ping(v) => Frame::Ping(v),
            AxumMessage::Pong(v) => Frame::Pong(v),
            AxumMessage::Close(_) => Frame::Close,
        }
    }
}

impl From<WsMessage> for Frame {
    fn from(msg: WsMessage) -> Self {
        match msg {
            WsMessage::Text(s) => Frame::Text(s),
            WsMessage::Binary(b) => Frame::Binary(Bytes::from(b)),
            WsMessage::Ping(v) => Frame::Ping(v),
            WsMessage::Pong(v) => Frame::Pong(v),
            WsMessage::Close(_) => Frame::Close,
            // Raw frames are never surfaced by a reading socket.
            WsMessage::Frame(_) => Frame::Pong(Vec::new()),
        }
    }
}

/// Tunnel-level inbound item.
#[derive(Debug)]
pub enum Inbound {
    Envelope(Envelope),
    Ping(Vec<u8>),
    Pong,
    Close,
}

/// Decode one tunnel message. Envelopes arrive as JSON text; a binary
/// message carrying the same JSON is accepted too.
pub fn decode_tunnel(frame: Frame) -> Result<Inbound> {
    match frame {
        Frame::Text(s) => Ok(Inbound::Envelope(protocol::decode(s.as_bytes())?)),
        Frame::Binary(b) => Ok(Inbound::Envelope(protocol::decode(&b)?)),
        Frame::Ping(v) => Ok(Inbound::Ping(v)),
        Frame::Pong(_) => Ok(Inbound::Pong),
        Frame::Close => Ok(Inbound::Close),
    }
}

/// Encode an envelope for a client-side socket.
pub fn client_message(env: &Envelope) -> Result<WsMessage> {
    Ok(WsMessage::Text(protocol::encode(env)?))
}

/// Encode an envelope for a server-side socket.
pub fn server_message(env: &Envelope) -> Result<AxumMessage> {
    Ok(AxumMessage::Text(protocol::encode(env)?))
}
