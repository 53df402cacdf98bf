use std::sync::Arc;

use tokio::sync::mpsc;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::{ClientIdentity, Envelope};

use super::PendingReplies;

/// One registered subordinate connection.
///
/// `tx` feeds the connection's writer task; `pending` holds the waiters for
/// proxy responses on this connection. Both are shared by every copy made
/// through `with_identity`.
#[derive(Clone)]
pub struct ConnectionEntry {
    pub cid: String,
    pub conn_id: u64,
    pub identity: ClientIdentity,
    tx: mpsc::Sender<Envelope>,
    pending: Arc<PendingReplies>,
}

impl ConnectionEntry {
    pub fn new(cid: impl Into<String>, conn_id: u64, tx: mpsc::Sender<Envelope>) -> Self {
        let cid = cid.into();
        Self {
            identity: ClientIdentity::bare(cid.clone()),
            cid,
            conn_id,
            tx,
            pending: Arc::new(PendingReplies::new()),
        }
    }

    pub fn with_identity(&self, identity: ClientIdentity) -> Self {
        Self {
            identity,
            ..self.clone()
        }
    }

    pub fn pending(&self) -> &Arc<PendingReplies> {
        &self.pending
    }

    /// Queue an envelope for the connection's writer.
    pub async fn send(&self, env: Envelope) -> Result<()> {
        self.tx
            .send(env)
            .await
            .map_err(|_| CascadeError::ConnectionClosed)
    }
}
