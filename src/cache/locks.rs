//! # Per-Key Lock Table
//!
//! Maps each [`CacheKey`] to an async mutex so that initialization and teardown
//! for one key never block callers working on another key.
//!
//! ## Entry lifetime:
//! Entries are reference-counted. [`KeyedLocks::lock_for`] hands out a
//! [`LockTicket`] and bumps the count under the table's coarse mutex; dropping
//! the ticket (or the [`KeyGuard`] it turned into) decrements it, and the entry
//! is removed at zero. Any two callers interested in the same key at the same
//! time therefore always share one mutex, while the table does not grow with
//! every key ever seen.
//!
//! The coarse mutex only guards the map itself and is held for a hash lookup,
//! never across an `.await`.

use crate::cache::key::CacheKey;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct LockEntry {
    lock: Arc<AsyncMutex<()>>,
    holders: usize,
}

type LockTable = Arc<Mutex<HashMap<CacheKey, LockEntry>>>;

/// Registry of per-key locks.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    entries: LockTable,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create the lock for `key` and register interest in it.
    pub fn lock_for(&self, key: &CacheKey) -> LockTicket {
        let lock = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(|| LockEntry {
                lock: Arc::new(AsyncMutex::new(())),
                holders: 0,
            });
            entry.holders += 1;
            Arc::clone(&entry.lock)
        };

        LockTicket {
            key: key.clone(),
            lock,
            entries: Arc::clone(&self.entries),
        }
    }

    /// Number of keys that currently have a live lock entry.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registered interest in one key's lock. Not yet holding it.
pub struct LockTicket {
    key: CacheKey,
    lock: Arc<AsyncMutex<()>>,
    entries: LockTable,
}

impl LockTicket {
    /// Wait for exclusive access to the key.
    ///
    /// Cancel-safe: dropping the future drops the ticket and releases the
    /// table entry reference.
    pub async fn acquire(self) -> KeyGuard {
        let guard = Arc::clone(&self.lock).lock_owned().await;
        KeyGuard {
            _guard: guard,
            _ticket: self,
        }
    }
}

impl Drop for LockTicket {
    fn drop(&mut self) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.holders = entry.holders.saturating_sub(1);
            if entry.holders == 0 {
                entries.remove(&self.key);
            }
        }
    }
}

/// Exclusive access to one key. Owned, so it can move into a spawned task.
pub struct KeyGuard {
    // Field order matters: the mutex is unlocked before the ticket releases
    // its table entry.
    _guard: OwnedMutexGuard<()>,
    _ticket: LockTicket,
}
