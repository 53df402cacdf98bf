//! Shared error type across cascade crates.

use thiserror::Error;

/// Stable error codes, used in logs, metrics labels and test vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Malformed envelope or payload.
    Decode,
    /// Media tag shorter than its header or declared size.
    FrameTooShort,
    /// Peer violated the handshake (missing cid, bad magic, ...).
    Protocol,
    /// No live connection registered for the client id.
    NotFound,
    /// No matching response within the deadline.
    Timeout,
    /// Connection went away while waiting.
    ConnectionClosed,
    /// Dial/read/write failure on the underlying transport.
    Transport,
    /// Invalid configuration.
    Config,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Decode => "DECODE",
            ErrorCode::FrameTooShort => "FRAME_TOO_SHORT",
            ErrorCode::Protocol => "PROTOCOL",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Config => "CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, CascadeError>;

/// Unified error type used by core and node.
#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("decode: {0}")]
    Decode(String),
    #[error("frame too short")]
    FrameTooShort,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("no connection for client: {0}")]
    NotFound(String),
    #[error("timed out waiting for response")]
    Timeout,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("transport: {0}")]
    Transport(String),
    #[error("config: {0}")]
    Config(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl CascadeError {
    /// Map to a stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            CascadeError::Decode(_) => ErrorCode::Decode,
            CascadeError::FrameTooShort => ErrorCode::FrameTooShort,
            CascadeError::Protocol(_) => ErrorCode::Protocol,
            CascadeError::NotFound(_) => ErrorCode::NotFound,
            CascadeError::Timeout => ErrorCode::Timeout,
            CascadeError::ConnectionClosed => ErrorCode::ConnectionClosed,
            CascadeError::Transport(_) => ErrorCode::Transport,
            CascadeError::Config(_) => ErrorCode::Config,
            CascadeError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Whether the error ends the connection it happened on.
    ///
    /// Decode errors are skipped by read loops; everything the transport
    /// reports is fatal.
    pub fn is_fatal_to_connection(&self) -> bool {
        !matches!(self, CascadeError::Decode(_) | CascadeError::FrameTooShort)
    }
}
