//! Optimistic mutations with rollback on failure.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use resync_core::{CacheEntry, CacheKey, MutationId, Result, SyncError};
use resync_notify::Notifier;
use resync_store::CacheStore;
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::invalidation::InvalidationDispatcher;
use crate::source::Source;

type OptimisticUpdate<T> = Box<dyn FnOnce(&T) -> T + Send>;

/// Description of a write against one cache key.
pub struct Mutation<T> {
    key: CacheKey,
    optimistic: Option<OptimisticUpdate<T>>,
    dependents: Vec<CacheKey>,
}

impl<T> Mutation<T> {
    /// Mutation of `key` without an optimistic update.
    #[must_use]
    pub const fn new(key: CacheKey) -> Self {
        Self {
            key,
            optimistic: None,
            dependents: Vec::new(),
        }
    }

    /// Show `update(current)` immediately, before the remote call settles.
    #[must_use]
    pub fn optimistic(mut self, update: impl FnOnce(&T) -> T + Send + 'static) -> Self {
        self.optimistic = Some(Box::new(update));
        self
    }

    /// Also refresh `key` once the mutation settles.
    #[must_use]
    pub fn invalidates(mut self, key: CacheKey) -> Self {
        if key != self.key && !self.dependents.contains(&key) {
            self.dependents.push(key);
        }
        self
    }

    /// Key being mutated.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Keys refreshed in addition to [`Mutation::key`].
    #[must_use]
    pub fn dependents(&self) -> &[CacheKey] {
        &self.dependents
    }

    /// Returns true when an optimistic update is attached.
    #[must_use]
    pub const fn is_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }
}

impl<T> std::fmt::Debug for Mutation<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("key", &self.key)
            .field("optimistic", &self.optimistic.is_some())
            .field("dependents", &self.dependents)
            .finish()
    }
}

/// Snapshot kept between optimistic apply and remote settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMutation<T> {
    /// Mutation holding the optimistic value.
    pub id: MutationId,
    /// Key that was updated.
    pub key: CacheKey,
    /// Entry as it was right before the optimistic apply.
    pub previous: CacheEntry<T>,
    /// When the optimistic value was written.
    pub applied_at: OffsetDateTime,
}

/// Per-key async locks; entries are dropped once nobody holds or awaits them.
#[derive(Clone, Default)]
struct KeyLocks {
    locks: Arc<Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>>,
}

struct KeyLockGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: KeyLocks,
    key: CacheKey,
}

impl KeyLocks {
    fn map(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(&self, key: &CacheKey) -> KeyLockGuard {
        let lock = Arc::clone(self.map().entry(key.clone()).or_default());
        let guard = lock.lock_owned().await;
        KeyLockGuard {
            guard: Some(guard),
            locks: self.clone(),
            key: key.clone(),
        }
    }
}

impl Drop for KeyLockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.locks.map();
        if map.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.key);
        }
    }
}

type PendingMap<T> = Arc<Mutex<HashMap<MutationId, PendingMutation<T>>>>;

/// Rolls an optimistic value back if the mutation future is dropped early.
struct RollbackGuard<'a, T: Clone> {
    store: &'a CacheStore<T>,
    pending: &'a PendingMap<T>,
    id: MutationId,
    armed: bool,
}

impl<T: Clone> Drop for RollbackGuard<'_, T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
        if let Some(pending) = removed {
            warn!(key = %pending.key, mutation = %self.id, "Mutation dropped before settling; rolling back");
            self.store.rollback(&pending.key, self.id, pending.previous);
        }
    }
}

/// Runs mutations against the shared cache store.
pub struct MutationExecutor<T, S> {
    store: Arc<CacheStore<T>>,
    dispatcher: InvalidationDispatcher<T, S>,
    notifier: Notifier,
    pending: PendingMap<T>,
    locks: KeyLocks,
}

impl<T, S> Clone for MutationExecutor<T, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
            notifier: self.notifier.clone(),
            pending: Arc::clone(&self.pending),
            locks: self.locks.clone(),
        }
    }
}

impl<T, S> MutationExecutor<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Source<T>,
{
    /// Create an executor writing to the dispatcher's store.
    #[must_use]
    pub fn new(dispatcher: InvalidationDispatcher<T, S>, notifier: Notifier) -> Self {
        Self {
            store: Arc::clone(dispatcher.store()),
            dispatcher,
            notifier,
            pending: Arc::default(),
            locks: KeyLocks::default(),
        }
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<MutationId, PendingMutation<T>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutations whose optimistic value is still waiting on the remote call.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingMutation<T>> {
        let mut pending: Vec<_> = self.pending_map().values().cloned().collect();
        pending.sort_by_key(|mutation| mutation.applied_at);
        pending
    }

    /// Run `remote` with an optional optimistic update in front of it.
    ///
    /// `remote` is not polled until the optimistic value is in the store.
    /// Mutations of the same key run one after another; the second one only
    /// applies its optimistic update once the first has settled. On failure
    /// the entry is restored to the snapshot taken right before this
    /// mutation's optimistic write, unless a confirmed value replaced the
    /// optimistic one in the meantime. Either way the key and its dependents are
    /// scheduled for refresh.
    ///
    /// Dropping the returned future before it settles rolls the optimistic
    /// value back.
    ///
    /// # Errors
    /// Returns the remote call's error converted into [`SyncError`].
    pub async fn execute<R, E, Fut>(&self, mutation: Mutation<T>, remote: Fut) -> Result<R>
    where
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Into<SyncError>,
    {
        let Mutation {
            key,
            optimistic,
            dependents,
        } = mutation;
        let id = MutationId::new();
        let _lock = self.locks.acquire(&key).await;

        self.notifier.mutation_started(&key, id);
        let mut rollback = RollbackGuard {
            store: &self.store,
            pending: &self.pending,
            id,
            armed: false,
        };
        if let Some(update) = optimistic {
            match self.store.apply_optimistic(&key, id, update) {
                Some(previous) => {
                    self.pending_map().insert(
                        id,
                        PendingMutation {
                            id,
                            key: key.clone(),
                            previous,
                            applied_at: OffsetDateTime::now_utc(),
                        },
                    );
                    rollback.armed = true;
                }
                None => debug!(%key, mutation = %id, "Nothing cached; skipping optimistic update"),
            }
        }

        let outcome = remote.await.map_err(Into::into);
        rollback.armed = false;
        let pending = self.pending_map().remove(&id);

        match &outcome {
            Ok(_) => {
                if pending.is_some() {
                    self.store.confirm(&key, id);
                }
                info!(%key, mutation = %id, "Mutation succeeded");
                self.notifier.mutation_succeeded(&key, id);
            }
            Err(err) => {
                if let Some(pending) = pending {
                    self.store.rollback(&key, id, pending.previous);
                }
                warn!(%key, mutation = %id, kind = ?err.kind(), "Mutation failed: {err}");
                self.notifier.mutation_failed(&key, id, err);
            }
        }

        self.dispatcher.schedule_refresh(&key);
        for dependent in &dependents {
            self.dispatcher.schedule_refresh(dependent);
        }
        outcome
    }
}
