//! Keyed mutual exclusion.
//!
//! A [`PartitionLock`] serialises work per key while letting work on
//! different keys proceed concurrently. Holding a key is represented by a
//! [`PartitionGuard`]; dropping the guard releases the key and wakes every
//! waiter so each can re-check its own key.
//!
//! There is no fairness among waiters for the same key, no timeout, and no
//! reentrancy: a task holding a key must not lock the same key again.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// A set of currently held keys plus a wake-up signal for waiters.
pub struct PartitionLock<K>
where
    K: Eq + Hash + Clone,
{
    held: Mutex<HashSet<K>>,
    released: Notify,
}

impl<K> PartitionLock<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            held: Mutex::new(HashSet::new()),
            released: Notify::new(),
        }
    }

    /// Wait until no other task holds `key`, then mark it held.
    ///
    /// Dropping the returned future before it resolves leaves no trace.
    pub async fn lock(&self, key: K) -> PartitionGuard<'_, K> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            // Register before checking so a release between the check and the await is not missed.
            released.as_mut().enable();

            if let Some(guard) = self.try_lock(key.clone()) {
                return guard;
            }

            released.await;
        }
    }

    /// Mark `key` held if nobody else holds it.
    pub fn try_lock(&self, key: K) -> Option<PartitionGuard<'_, K>> {
        if self.held().insert(key.clone()) {
            Some(PartitionGuard { lock: self, key })
        } else {
            None
        }
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.held().contains(key)
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held().len()
    }

    fn unlock(&self, key: &K) {
        self.held().remove(key);
        self.released.notify_waiters();
    }

    // The set is only touched by single insert/remove calls, so a poisoned mutex still guards a consistent set.
    fn held(&self) -> MutexGuard<'_, HashSet<K>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> Default for PartitionLock<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for PartitionLock<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionLock")
            .field("held", &self.held_count())
            .finish()
    }
}

/// Proof that the holder owns one key of a [`PartitionLock`].
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct PartitionGuard<'a, K>
where
    K: Eq + Hash + Clone,
{
    lock: &'a PartitionLock<K>,
    key: K,
}

impl<K> PartitionGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for PartitionGuard<'_, K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        self.lock.unlock(&self.key);
    }
}

impl<K> fmt::Debug for PartitionGuard<'_, K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionGuard")
            .field("key", &self.key)
            .finish()
    }
}
