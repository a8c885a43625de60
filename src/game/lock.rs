//! Advisory lock over the store's optimistic single-key update
//!
//! A lock is a `{timestamp}` marker at `locks/<key>`. It is held while
//! `now <= timestamp + ttl`; past that it is treated as absent whatever the
//! stored value, so a crashed holder never blocks anyone for longer than the TTL.
//!
//! There is no holder identity: `release` clears the marker unconditionally,
//! even if the TTL lapsed and someone else has since acquired it.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::clock::Clock;
use crate::models::LockRecord;
use crate::store::{LockStore, StoreError};

pub fn creation_lock_key(user_id: &str) -> String {
    format!("user-guess:{user_id}")
}

pub fn resolution_lock_key(user_id: &str, guess_id: &str) -> String {
    format!("resolve-guess:{user_id}:{guess_id}")
}

#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    ttl_ms: i64,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl_ms: ttl.as_millis().min(i64::MAX as u128) as i64,
        }
    }

    pub fn ttl_ms(&self) -> i64 {
        self.ttl_ms
    }

    /// Try once to take the lock. `Ok(false)` means someone else holds it.
    pub async fn acquire(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_ms();
        let ttl_ms = self.ttl_ms;
        let attempt = LockRecord { timestamp: now };

        let tx = self
            .store
            .transact(key, &move |current: Option<&LockRecord>| match current {
                Some(held) if now <= held.timestamp.saturating_add(ttl_ms) => None,
                _ => Some(attempt),
            })
            .await?;

        // Committing is not enough: the stored marker must be the one we wrote.
        let acquired = tx.committed && tx.snapshot.map(|s| s.timestamp) == Some(attempt.timestamp);
        debug!(lock_key = key, acquired, "lock acquire");
        Ok(acquired)
    }

    /// Clear the marker. Best effort: failures are logged, never returned.
    pub async fn release(&self, key: &str) {
        match self.store.clear(key).await {
            Ok(()) => debug!(lock_key = key, "lock released"),
            Err(e) => warn!(lock_key = key, error = %e, "lock release failed, relying on TTL"),
        }
    }
}
