//! Tunnel protocol modules (envelope + payload messages).
//!
//! A registration tunnel carries one JSON envelope per WebSocket message:
//! - `envelope`: the sequence-numbered, kind-tagged outer message.
//! - `message`: the kind-specific payloads (client identity, proxy request).
//!
//! All decoders are panic-free: malformed input is reported as
//! `CascadeError::Decode` so read loops can log it and keep the connection.

pub mod envelope;
pub mod message;

mod b64;

pub use envelope::{decode, encode, Envelope, EnvelopeKind, UnknownKind};
pub use message::{ClientIdentity, Headers, ProxyMessage};
