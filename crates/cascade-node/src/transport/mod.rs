//! Transport layer (WebSocket).
//!
//! Upgrade parameter parsing, the decode-once tunnel codec, and the
//! registration endpoint served to subordinates.

pub mod codec;
pub mod handshake;
pub mod register;
