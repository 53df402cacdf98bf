//! Tunnel envelope (JSON text frame).
//!
//! Wire shape: `{"sn": <u64>, "type": <int>, "pad": <base64>}`. `sn` is the
//! sole correlation key and is echoed verbatim by the responder.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{CascadeError, Result};
use crate::protocol::b64;
use crate::protocol::message::{ClientIdentity, ProxyMessage};

/// Envelope kind. Integers outside the known set decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum EnvelopeKind {
    Info,
    ProxyRequest,
    ProxyResponse,
    Unknown(UnknownKind),
}

/// A kind integer outside `0..=2`. Only built by `EnvelopeKind::from(i64)`,
/// so it never shadows a known kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownKind(i64);

impl UnknownKind {
    pub fn value(self) -> i64 {
        self.0
    }
}

impl From<i64> for EnvelopeKind {
    fn from(v: i64) -> Self {
        match v {
            0 => EnvelopeKind::Info,
            1 => EnvelopeKind::ProxyRequest,
            2 => EnvelopeKind::ProxyResponse,
            other => EnvelopeKind::Unknown(UnknownKind(other)),
        }
    }
}

impl From<EnvelopeKind> for i64 {
    fn from(k: EnvelopeKind) -> Self {
        match k {
            EnvelopeKind::Info => 0,
            EnvelopeKind::ProxyRequest => 1,
            EnvelopeKind::ProxyResponse => 2,
            EnvelopeKind::Unknown(v) => v.0,
        }
    }
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Info => "info",
            EnvelopeKind::ProxyRequest => "proxy_request",
            EnvelopeKind::ProxyResponse => "proxy_response",
            EnvelopeKind::Unknown(_) => "unknown",
        }
    }
}

/// Outer tunnel message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Sender-assigned sequence number.
    #[serde(rename = "sn")]
    pub sequence: u64,
    /// Payload discriminator (field name is `type` on the wire).
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Kind-specific serialized sub-message.
    #[serde(rename = "pad", with = "b64", default)]
    pub payload: Bytes,
}

impl Envelope {
    pub fn info(sequence: u64, identity: &ClientIdentity) -> Result<Self> {
        let payload = serde_json::to_vec(identity)
            .map_err(|e| CascadeError::Internal(format!("identity encode failed: {e}")))?;
        Ok(Self {
            sequence,
            kind: EnvelopeKind::Info,
            payload: Bytes::from(payload),
        })
    }

    pub fn proxy_request(sequence: u64, msg: &ProxyMessage) -> Result<Self> {
        let payload = serde_json::to_vec(msg)
            .map_err(|e| CascadeError::Internal(format!("proxy message encode failed: {e}")))?;
        Ok(Self {
            sequence,
            kind: EnvelopeKind::ProxyRequest,
            payload: Bytes::from(payload),
        })
    }

    pub fn proxy_response(sequence: u64, body: Bytes) -> Self {
        Self {
            sequence,
            kind: EnvelopeKind::ProxyResponse,
            payload: body,
        }
    }

    /// Parse the payload of an `Info` envelope.
    pub fn identity(&self) -> Result<ClientIdentity> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| CascadeError::Decode(format!("invalid client identity: {e}")))
    }

    /// Parse the payload of a `ProxyRequest` envelope.
    pub fn proxy_message(&self) -> Result<ProxyMessage> {
        serde_json::from_slice(&self.payload)
            .map_err(|e| CascadeError::Decode(format!("invalid proxy message: {e}")))
    }
}

/// Serialize an envelope to its JSON text form.
pub fn encode(env: &Envelope) -> Result<String> {
    serde_json::to_string(env)
        .map_err(|e| CascadeError::Internal(format!("envelope encode failed: {e}")))
}

/// Parse an envelope from raw frame bytes.
pub fn decode(raw: &[u8]) -> Result<Envelope> {
    serde_json::from_slice(raw).map_err(|e| CascadeError::Decode(format!("invalid envelope: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn unknown_kind_survives_decode() {
        let env = decode(br#"{"sn":4,"type":7,"pad":null}"#).unwrap();
        assert_eq!(env.kind, EnvelopeKind::from(7));
        assert!(matches!(env.kind, EnvelopeKind::Unknown(k) if k.value() == 7));
        assert!(env.payload.is_empty());
        assert_eq!(i64::from(env.kind), 7);
    }

    #[test]
    fn known_integers_never_decode_as_unknown() {
        for v in -2..=5i64 {
            let kind = EnvelopeKind::from(v);
            assert_eq!(i64::from(kind), v);
            assert_eq!(matches!(kind, EnvelopeKind::Unknown(_)), !(0..=2).contains(&v));

            let env = Envelope { sequence: 1, kind, payload: Bytes::new() };
            assert_eq!(decode(encode(&env).unwrap().as_bytes()).unwrap(), env);
        }
    }

    #[test]
    fn response_payload_is_base64_on_the_wire() {
        let env = Envelope::proxy_response(9, Bytes::from_static(b"OK"));
        let s = encode(&env).unwrap();
        assert_eq!(s, r#"{"sn":9,"type":2,"pad":"T0s="}"#);
    }

    #[test]
    fn negative_sequence_is_a_decode_error() {
        let err = decode(br#"{"sn":-1,"type":0}"#).unwrap_err();
        assert!(!err.is_fatal_to_connection());
    }
}
