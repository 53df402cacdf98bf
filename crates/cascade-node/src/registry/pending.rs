use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use cascade_core::error::{CascadeError, Result};
use cascade_core::protocol::Envelope;

/// Waiters for proxy responses on one connection, keyed by request sequence.
#[derive(Default)]
pub struct PendingReplies {
    waiters: Mutex<HashMap<u64, oneshot::Sender<Envelope>>>,
    closed: AtomicBool,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Envelope>>> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserve a waiter for `sequence`. Fails once the connection is gone.
    pub fn register(&self, sequence: u64) -> Result<oneshot::Receiver<Envelope>> {
        let (tx, rx) = oneshot::channel();
        let mut map = self.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(CascadeError::ConnectionClosed);
        }
        map.insert(sequence, tx);
        Ok(rx)
    }

    /// Hand `env` to the waiter with the same sequence.
    /// Returns false if nobody is waiting for it.
    pub fn complete(&self, env: Envelope) -> bool {
        let waiter = self.lock().remove(&env.sequence);
        match waiter {
            Some(tx) => tx.send(env).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, sequence: u64) {
        self.lock().remove(&sequence);
    }

    /// Drop every waiter; blocked callers observe a closed channel.
    pub fn close(&self) {
        let mut map = self.lock();
        self.closed.store(true, Ordering::Release);
        map.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
