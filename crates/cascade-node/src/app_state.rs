//! Node context: the single owner of everything shared between sessions.
//!
//! Cheap to clone; every session, the correlator and the HTTP handlers hold a
//! handle to the same inner state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use cascade_core::error::Result;
use cascade_core::protocol::ClientIdentity;

use crate::config::NodeConfig;
use crate::obs::CascadeMetrics;
use crate::registry::ConnectionRegistry;
use crate::relay::StreamHub;
use crate::rpc::RpcCorrelator;

/// Monotonic per-process sequence numbers for outbound envelopes.
#[derive(Debug)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

const PUSH_KEY_SEP: &str = " -> ";

fn push_key(stream_path: &str, target: &str) -> String {
    format!("{stream_path}{PUSH_KEY_SEP}{target}")
}

#[derive(Clone)]
pub struct NodeContext {
    inner: Arc<NodeContextInner>,
}

struct NodeContextInner {
    cfg: NodeConfig,
    identity: ClientIdentity,
    registry: Arc<ConnectionRegistry>,
    sequence: Arc<SequenceCounter>,
    conn_ids: AtomicU64,
    hub: Arc<StreamHub>,
    metrics: Arc<CascadeMetrics>,
    /// Running push supervisors, keyed by `stream -> target`.
    pushes: DashMap<String, CancellationToken>,
    shutdown: CancellationToken,
}

impl NodeContext {
    /// Build the context. An empty `cinfo.cid` is replaced by a fresh UUID.
    pub fn new(cfg: NodeConfig) -> Result<Self> {
        let mut identity = ClientIdentity {
            id: cfg.cinfo.cid.clone(),
            name: cfg.cinfo.name.clone(),
            serial: cfg.cinfo.serial.clone(),
        };
        if identity.id.is_empty() {
            identity.id = uuid::Uuid::new_v4().to_string();
            tracing::info!(cid = %identity.id, "generated client id (persist it as cinfo.cid)");
        }

        Ok(Self {
            inner: Arc::new(NodeContextInner {
                cfg,
                identity,
                registry: Arc::new(ConnectionRegistry::new()),
                sequence: Arc::new(SequenceCounter::new()),
                conn_ids: AtomicU64::new(1),
                hub: Arc::new(StreamHub::new()),
                metrics: Arc::new(CascadeMetrics::default()),
                pushes: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        })
    }

    pub fn cfg(&self) -> &NodeConfig {
        &self.inner.cfg
    }

    /// Identity this node presents to its superiors.
    pub fn identity(&self) -> &ClientIdentity {
        &self.inner.identity
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.inner.registry)
    }

    pub fn sequence(&self) -> Arc<SequenceCounter> {
        Arc::clone(&self.inner.sequence)
    }

    pub fn next_conn_id(&self) -> u64 {
        self.inner.conn_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub fn hub(&self) -> Arc<StreamHub> {
        Arc::clone(&self.inner.hub)
    }

    pub fn metrics(&self) -> Arc<CascadeMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Cancelled on shutdown; supervisors derive child tokens from it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    /// Reserve a push slot. `None` if the same push is already running.
    pub fn begin_push(&self, stream_path: &str, target: &str) -> Option<CancellationToken> {
        let key = push_key(stream_path, target);
        match self.inner.pushes.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(v) => {
                let token = self.inner.shutdown.child_token();
                v.insert(token.clone());
                Some(token)
            }
        }
    }

    pub fn finish_push(&self, stream_path: &str, target: &str) {
        self.inner.pushes.remove(&push_key(stream_path, target));
    }

    /// Cancel a running push. Returns false if none was running.
    pub fn stop_push(&self, stream_path: &str, target: &str) -> bool {
        match self.inner.pushes.get(&push_key(stream_path, target)) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// `(stream, target)` of every running push.
    pub fn pushes(&self) -> Vec<(String, String)> {
        let mut out: Vec<(String, String)> = self
            .inner
            .pushes
            .iter()
            .filter_map(|r| {
                r.key()
                    .split_once(PUSH_KEY_SEP)
                    .map(|(s, t)| (s.to_string(), t.to_string()))
            })
            .collect();
        out.sort();
        out
    }

    pub fn correlator(&self) -> RpcCorrelator {
        RpcCorrelator::new(
            self.registry(),
            self.sequence(),
            self.inner.cfg.rpc.timeout(),
            self.metrics(),
        )
    }
}
