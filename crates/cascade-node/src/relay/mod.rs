//! Media relay over a dedicated WebSocket per stream.
//!
//! - push: a subordinate subscribes to one of its local streams and sends it
//!   upward as a stream header, a metadata script tag, then media tags.
//! - pull: a superior accepts such a connection and republishes the frames
//!   locally under `<streamPath>-<cid>`.

pub mod hub;
pub mod pull;
pub mod push;

pub use hub::{Publisher, StreamEvent, StreamHub, StreamInfo, Subscriber};
pub use pull::push_upgrade;
pub use push::{push, push_url, run_push, spawn_configured, start_push};

use cascade_core::error::CascadeError;

use crate::obs::CascadeMetrics;

/// Relay direction, used in logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    Push,
    Pull,
}

impl RelayRole {
    pub fn as_str(self) -> &'static str {
        match self {
            RelayRole::Push => "push",
            RelayRole::Pull => "pull",
        }
    }
}

/// Shared teardown reporting for both relay roles. The caller drops its
/// socket and its publisher/subscriber handle right after.
pub(crate) fn on_conn_err(metrics: &CascadeMetrics, role: RelayRole, stream: &str, err: &CascadeError) {
    metrics
        .relay_errors
        .inc(&[("role", role.as_str()), ("code", err.code().as_str())]);
    tracing::warn!(role = role.as_str(), %stream, error = %err, "relay connection error");
}
