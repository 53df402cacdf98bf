use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::{Envelope, ProxyMessage};

use crate::app_state::SequenceCounter;
use crate::obs::CascadeMetrics;
use crate::registry::{ConnectionRegistry, PendingReplies};

/// Turns a proxy request on a registered connection into a call/return.
///
/// Each call reserves a waiter keyed by its own sequence before the request
/// is written, so concurrent calls on one connection never see each other's
/// responses.
#[derive(Clone)]
pub struct RpcCorrelator {
    registry: Arc<ConnectionRegistry>,
    sequence: Arc<SequenceCounter>,
    timeout: Duration,
    metrics: Arc<CascadeMetrics>,
}

/// Removes the waiter when the call ends without a response
/// (timeout, send failure, or the caller's future being dropped).
struct WaiterGuard<'a> {
    pending: &'a PendingReplies,
    sequence: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.pending.cancel(self.sequence);
    }
}

impl RpcCorrelator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        sequence: Arc<SequenceCounter>,
        timeout: Duration,
        metrics: Arc<CascadeMetrics>,
    ) -> Self {
        Self {
            registry,
            sequence,
            timeout,
            metrics,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `msg` to the subordinate registered as `cid` and wait for the
    /// response body.
    pub async fn call(&self, cid: &str, msg: &ProxyMessage) -> Result<Bytes> {
        let started = Instant::now();
        let res = self.call_inner(cid, msg).await;

        let result = match &res {
            Ok(_) => "ok",
            Err(e) => e.code().as_str(),
        };
        self.metrics.proxy_calls.inc(&[("result", result)]);
        self.metrics
            .proxy_duration
            .observe(&[("result", result)], started.elapsed());
        res
    }

    async fn call_inner(&self, cid: &str, msg: &ProxyMessage) -> Result<Bytes> {
        let entry = self
            .registry
            .get(cid)
            .ok_or_else(|| CascadeError::NotFound(format!("no connection for cid {cid}")))?;

        let seq = self.sequence.next();
        let env = Envelope::proxy_request(seq, msg)?;

        let pending = Arc::clone(entry.pending());
        let rx = pending.register(seq)?;
        let _guard = WaiterGuard {
            pending: &pending,
            sequence: seq,
        };

        // One deadline covers queueing the request and waiting for the reply.
        let deadline = tokio::time::Instant::now() + self.timeout;

        tracing::debug!(%cid, seq, method = %msg.method, url = %msg.target, "proxy request");
        match tokio::time::timeout_at(deadline, entry.send(env)).await {
            Ok(sent) => sent?,
            Err(_) => {
                tracing::warn!(%cid, seq, timeout_ms = self.timeout.as_millis() as u64, "outbound queue full, proxy request timed out");
                return Err(CascadeError::Timeout);
            }
        }

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(resp)) => {
                tracing::debug!(%cid, seq, bytes = resp.payload.len(), "proxy response");
                Ok(resp.payload)
            }
            Ok(Err(_)) => {
                tracing::warn!(%cid, seq, "connection closed while waiting for proxy response");
                Err(CascadeError::ConnectionClosed)
            }
            Err(_) => {
                tracing::warn!(%cid, seq, timeout_ms = self.timeout.as_millis() as u64, "proxy request timed out");
                Err(CascadeError::Timeout)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionEntry;
    use cascade_core::protocol::EnvelopeKind;
    use tokio::sync::mpsc;

    fn setup(timeout_ms: u64) -> (RpcCorrelator, Arc<ConnectionRegistry>, mpsc::Receiver<Envelope>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, rx) = mpsc::channel(8);
        registry.register(Arc::new(ConnectionEntry::new("c1", 1, tx)));
        let corr = RpcCorrelator::new(
            Arc::clone(&registry),
            Arc::new(SequenceCounter::new()),
            Duration::from_millis(timeout_ms),
            Arc::new(CascadeMetrics::default()),
        );
        (corr, registry, rx)
    }

    #[tokio::test]
    async fn returns_matching_payload_and_ignores_mismatched() {
        let (corr, registry, mut rx) = setup(2_000);

        let peer = tokio::spawn(async move {
            let req = rx.recv().await.expect("request");
            assert_eq!(req.kind, EnvelopeKind::ProxyRequest);
            let pending = Arc::clone(registry.get("c1").expect("entry").pending());
            assert!(!pending.complete(Envelope::proxy_response(
                req.sequence + 100,
                Bytes::from_static(b"stolen")
            )));
            assert!(pending.complete(Envelope::proxy_response(
                req.sequence,
                Bytes::from_static(b"OK")
            )));
        });

        let body = corr
            .call("c1", &ProxyMessage::new("GET", "/status"))
            .await
            .expect("call");
        assert_eq!(&body[..], b"OK");
        peer.await.expect("peer");
    }

    #[tokio::test]
    async fn unknown_cid_is_not_found() {
        let (corr, _registry, _rx) = setup(100);
        let err = corr
            .call("nobody", &ProxyMessage::new("GET", "/"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, CascadeError::NotFound(_)));
    }

    #[tokio::test]
    async fn timeout_clears_waiter() {
        let (corr, registry, mut rx) = setup(50);
        let err = corr
            .call("c1", &ProxyMessage::new("GET", "/slow"))
            .await
            .expect_err("must time out");
        assert!(matches!(err, CascadeError::Timeout));

        let entry = registry.get("c1").expect("entry survives");
        assert!(entry.pending().is_empty());

        // A late reply to the timed-out call is dropped; the next call works.
        let late = rx.recv().await.expect("first request");
        assert!(!entry
            .pending()
            .complete(Envelope::proxy_response(late.sequence, Bytes::new())));

        let pending = Arc::clone(entry.pending());
        let corr = corr.with_timeout(Duration::from_secs(2));
        let peer = tokio::spawn(async move {
            let req = rx.recv().await.expect("second request");
            pending.complete(Envelope::proxy_response(req.sequence, Bytes::from_static(b"again")));
        });
        let body = corr
            .call("c1", &ProxyMessage::new("GET", "/slow"))
            .await
            .expect("second call");
        assert_eq!(&body[..], b"again");
        peer.await.expect("peer");
    }

    #[tokio::test]
    async fn connection_close_unblocks_caller() {
        let (corr, registry, mut rx) = setup(5_000);
        let closer = tokio::spawn(async move {
            let _req = rx.recv().await.expect("request");
            let entry = registry.get("c1").expect("entry");
            registry.remove("c1", entry.conn_id);
            entry.pending().close();
        });
        let err = corr
            .call("c1", &ProxyMessage::new("GET", "/"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, CascadeError::ConnectionClosed));
        closer.await.expect("closer");
    }

    #[tokio::test]
    async fn full_outbound_queue_times_out() {
        // Nothing drains the 8-slot queue, so later calls block on enqueue.
        let (corr, registry, _rx) = setup(100);
        let calls = (0..20).map(|_| {
            let corr = corr.clone();
            async move { corr.call("c1", &ProxyMessage::new("GET", "/stall")).await }
        });
        let results = tokio::time::timeout(
            Duration::from_secs(2),
            futures_util::future::join_all(calls),
        )
        .await
        .expect("every call must respect the rpc timeout");

        assert_eq!(results.len(), 20);
        for res in results {
            assert!(matches!(res, Err(CascadeError::Timeout)));
        }
        assert!(registry.get("c1").expect("entry").pending().is_empty());
    }
}
