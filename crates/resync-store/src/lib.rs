//! In-memory cache store for reconciled query results.

use resync_core::{CacheEntry, CacheKey, MutationId};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::debug;

/// Keyed store of the latest known value per resource collection.
///
/// Every operation takes the internal lock once and releases it before
/// returning, so callers never observe a partially applied write. The store is
/// meant to be shared through an `Arc` by whoever owns the views reading it.
pub struct CacheStore<T> {
    state: Mutex<StoreState<T>>,
}

struct StoreState<T> {
    entries: HashMap<CacheKey, CacheEntry<T>>,
    watchers: HashMap<CacheKey, watch::Sender<Option<CacheEntry<T>>>>,
}

impl<T> Default for CacheStore<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                watchers: HashMap::new(),
            }),
        }
    }
}

impl<T> CacheStore<T> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    /// Returns true when nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().entries.is_empty()
    }

    /// Returns true when the key has an entry.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.state().entries.contains_key(key)
    }

    /// Keys of every cached entry, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.state().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live subscriptions for the key.
    #[must_use]
    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        let mut state = self.state();
        let count = state.watchers.get(key).map_or(0, watch::Sender::receiver_count);
        if count == 0 {
            state.watchers.remove(key);
        }
        count
    }
}

impl<T: Clone> CacheStore<T> {
    /// Fetch a copy of the entry for `key`; missing keys yield `None`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        self.state().entries.get(key).cloned()
    }

    /// Fetch a copy of the cached value only.
    #[must_use]
    pub fn value(&self, key: &CacheKey) -> Option<T> {
        self.state().entries.get(key).map(|entry| entry.value.clone())
    }

    /// Overwrite the value, reset `fetched_at`, and clear staleness.
    pub fn set(&self, key: &CacheKey, value: T) {
        let mut state = self.state();
        state.entries.insert(
            key.clone(),
            CacheEntry::confirmed(key.clone(), value, OffsetDateTime::now_utc()),
        );
        state.publish(key);
        drop(state);
        debug!(%key, "Stored entry");
    }

    /// Store a fetched value unless an optimistic write is pending.
    ///
    /// Returns false when the result was discarded.
    pub fn set_if_settled(&self, key: &CacheKey, value: T) -> bool {
        let mut state = self.state();
        if let Some(mutation) = state.entries.get(key).and_then(|entry| entry.optimistic) {
            drop(state);
            debug!(%key, %mutation, "Discarding fetch result while mutation is pending");
            return false;
        }
        state.entries.insert(
            key.clone(),
            CacheEntry::confirmed(key.clone(), value, OffsetDateTime::now_utc()),
        );
        state.publish(key);
        true
    }

    /// Mark the entry stale while keeping its value.
    ///
    /// Returns false when the key has no entry.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.state();
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        entry.is_stale = true;
        state.publish(key);
        drop(state);
        debug!(%key, "Invalidated entry");
        true
    }

    /// Mark every entry under `prefix` stale, returning the affected keys.
    pub fn invalidate_prefix(&self, prefix: &CacheKey) -> Vec<CacheKey> {
        let mut state = self.state();
        let mut touched: Vec<CacheKey> = state
            .entries
            .iter_mut()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| {
                entry.is_stale = true;
                key.clone()
            })
            .collect();
        touched.sort();
        for key in &touched {
            state.publish(key);
        }
        touched
    }

    /// Apply an optimistic update to an existing entry.
    ///
    /// The snapshot and the write happen under one lock acquisition. Returns
    /// the pre-update entry, or `None` (and leaves the store untouched) when
    /// the key has no value to update. `update` must not call back into the
    /// store.
    pub fn apply_optimistic<F>(&self, key: &CacheKey, mutation: MutationId, update: F) -> Option<CacheEntry<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let mut state = self.state();
        let entry = state.entries.get_mut(key)?;
        let previous = entry.clone();
        entry.value = update(&entry.value);
        entry.optimistic = Some(mutation);
        state.publish(key);
        drop(state);
        debug!(%key, %mutation, "Applied optimistic update");
        Some(previous)
    }

    /// Release the optimistic marker held by `mutation`.
    ///
    /// The value stays in place until the next refetch replaces it.
    pub fn confirm(&self, key: &CacheKey, mutation: MutationId) -> bool {
        let mut state = self.state();
        match state.entries.get_mut(key) {
            Some(entry) if entry.optimistic == Some(mutation) => {
                entry.optimistic = None;
                state.publish(key);
                true
            }
            _ => false,
        }
    }

    /// Roll the entry back to a snapshot taken before an optimistic update.
    ///
    /// Staleness recorded since the snapshot is preserved. A `None` snapshot
    /// removes the entry.
    pub fn restore(&self, key: &CacheKey, previous: Option<CacheEntry<T>>) {
        let mut state = self.state();
        match previous {
            Some(mut snapshot) => {
                let stale_now = state.entries.get(key).is_some_and(|entry| entry.is_stale);
                snapshot.is_stale |= stale_now;
                state.entries.insert(key.clone(), snapshot);
            }
            None => {
                state.entries.remove(key);
            }
        }
        state.publish(key);
        drop(state);
        debug!(%key, "Restored entry");
    }

    /// Undo the optimistic write held by `mutation`.
    ///
    /// Restores `previous` like [`CacheStore::restore`], but only while the
    /// entry still carries the mutation's marker. A confirmed write that
    /// landed in the meantime is newer than the snapshot and stays. Returns
    /// true when the snapshot was restored.
    pub fn rollback(&self, key: &CacheKey, mutation: MutationId, previous: CacheEntry<T>) -> bool {
        let mut state = self.state();
        let Some(entry) = state.entries.get_mut(key) else {
            drop(state);
            debug!(%key, %mutation, "Entry gone; nothing to roll back");
            return false;
        };
        if entry.optimistic != Some(mutation) {
            drop(state);
            debug!(%key, %mutation, "Entry replaced since optimistic write; keeping newer value");
            return false;
        }
        let mut snapshot = previous;
        snapshot.is_stale |= entry.is_stale;
        *entry = snapshot;
        state.publish(key);
        drop(state);
        debug!(%key, %mutation, "Rolled back optimistic update");
        true
    }

    /// Remove the entry for `key`.
    pub fn evict(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        let mut state = self.state();
        let removed = state.entries.remove(key);
        if removed.is_some() {
            state.publish(key);
        }
        removed
    }

    /// Observe the entry for `key`.
    ///
    /// The subscription counts as an active reader until it is dropped.
    pub fn subscribe(&self, key: &CacheKey) -> Subscription<T> {
        let mut state = self.state();
        state.watchers.retain(|watched, tx| watched == key || tx.receiver_count() > 0);
        let current = state.entries.get(key).cloned();
        let rx = match state.watchers.get(key) {
            Some(tx) => tx.subscribe(),
            None => {
                let (tx, rx) = watch::channel(current);
                state.watchers.insert(key.clone(), tx);
                rx
            }
        };
        Subscription { key: key.clone(), rx }
    }
}

impl<T: Clone> StoreState<T> {
    fn publish(&mut self, key: &CacheKey) {
        let Some(tx) = self.watchers.get(key) else {
            return;
        };
        if tx.receiver_count() == 0 {
            self.watchers.remove(key);
            return;
        }
        tx.send_replace(self.entries.get(key).cloned());
    }
}

/// Live view of a single cache entry.
pub struct Subscription<T> {
    key: CacheKey,
    rx: watch::Receiver<Option<CacheEntry<T>>>,
}

impl<T: Clone> Subscription<T> {
    /// Key being observed.
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Latest entry seen by this subscription.
    #[must_use]
    pub fn current(&self) -> Option<CacheEntry<T>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next write to the entry.
    ///
    /// Returns false once the store has been dropped.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
