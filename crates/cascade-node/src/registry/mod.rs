//! Connection registry: `cid -> live connection` for every subordinate that
//! registered with this node.
//!
//! One reader/writer lock guards the map and is held only for the map
//! operation itself. Entries are immutable once inserted; identity updates
//! swap in a new `Arc<ConnectionEntry>` so an in-flight correlator call keeps
//! working against the handle it already cloned.

mod entry;
mod pending;

pub use entry::ConnectionEntry;
pub use pending::PendingReplies;

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use cascade_core::protocol::ClientIdentity;

#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, Arc<ConnectionEntry>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a panic elsewhere mid-operation; the map
    // itself is always left whole by the operations below.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<ConnectionEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<ConnectionEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert (or replace) the entry for `entry.cid`. Returns the replaced one.
    pub fn register(&self, entry: Arc<ConnectionEntry>) -> Option<Arc<ConnectionEntry>> {
        self.write().insert(entry.cid.clone(), entry)
    }

    pub fn get(&self, cid: &str) -> Option<Arc<ConnectionEntry>> {
        self.read().get(cid).cloned()
    }

    /// Remove the entry for `cid` if it still belongs to connection `conn_id`.
    /// Absent or already-replaced entries are left alone.
    pub fn remove(&self, cid: &str, conn_id: u64) -> Option<Arc<ConnectionEntry>> {
        let mut map = self.write();
        match map.get(cid) {
            Some(e) if e.conn_id == conn_id => map.remove(cid),
            _ => None,
        }
    }

    /// Replace the entry for `cid` with a copy carrying `identity`.
    /// Returns false if the connection is no longer the registered one.
    pub fn update_identity(&self, cid: &str, conn_id: u64, identity: ClientIdentity) -> bool {
        let mut map = self.write();
        let Some(current) = map.get(cid) else { return false; };
        if current.conn_id != conn_id {
            return false;
        }
        let next = Arc::new(current.with_identity(identity));
        map.insert(cid.to_string(), next);
        true
    }

    /// Last seen identity of every live connection, ordered by cid.
    pub fn identities(&self) -> Vec<ClientIdentity> {
        let map = self.read();
        let mut out: Vec<ClientIdentity> = map.values().map(|e| e.identity.clone()).collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
