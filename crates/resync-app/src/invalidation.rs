//! Debounced background refresh of invalidated cache entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use resync_core::{CacheKey, Result};
use resync_store::{CacheStore, Subscription};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::InvalidationConfig;
use crate::source::Source;

/// What [`InvalidationDispatcher::schedule_refresh`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A background fetch will run once the debounce window closes.
    Scheduled,
    /// A fetch for the key is already pending in the current window.
    Coalesced,
    /// Nobody is reading the key; the fetch waits for the next subscription.
    Deferred,
}

/// Decouples "a mutation happened" from "who needs to refetch".
pub struct InvalidationDispatcher<T, S> {
    inner: Arc<Inner<T, S>>,
}

struct Inner<T, S> {
    store: Arc<CacheStore<T>>,
    source: Arc<S>,
    debounce: Duration,
    scheduled: Mutex<HashSet<CacheKey>>,
}

impl<T, S> Clone for InvalidationDispatcher<T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, S> InvalidationDispatcher<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Source<T>,
{
    /// Create a dispatcher refreshing `store` from `source`.
    #[must_use]
    pub fn new(store: Arc<CacheStore<T>>, source: Arc<S>, config: &InvalidationConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                source,
                debounce: config.debounce(),
                scheduled: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Store being refreshed.
    #[must_use]
    pub fn store(&self) -> &Arc<CacheStore<T>> {
        &self.inner.store
    }

    /// Mark `key` stale and refresh it in the background if it is being read.
    ///
    /// Repeated calls within the debounce window coalesce into one fetch.
    pub fn schedule_refresh(&self, key: &CacheKey) -> RefreshOutcome {
        self.inner.store.invalidate(key);
        if self.inner.store.subscriber_count(key) == 0 {
            debug!(%key, "Refresh deferred until next subscription");
            return RefreshOutcome::Deferred;
        }
        self.schedule_fetch(key)
    }

    /// Observe `key`, fetching it when missing or stale.
    #[must_use]
    pub fn subscribe(&self, key: &CacheKey) -> Subscription<T> {
        let subscription = self.inner.store.subscribe(key);
        let needs_fetch = self
            .inner
            .store
            .get(key)
            .is_none_or(|entry| entry.is_stale);
        if needs_fetch {
            self.schedule_fetch(key);
        }
        subscription
    }

    /// Fetch `key` immediately, bypassing the debounce window.
    ///
    /// # Errors
    /// Returns the classified fetch error; the cached entry is left untouched.
    pub async fn refresh_now(&self, key: &CacheKey) -> Result<T> {
        self.inner.refetch(key).await
    }

    fn schedule_fetch(&self, key: &CacheKey) -> RefreshOutcome {
        if !self.inner.scheduled().insert(key.clone()) {
            debug!(%key, "Refresh coalesced");
            return RefreshOutcome::Coalesced;
        }
        let Ok(runtime) = Handle::try_current() else {
            self.inner.scheduled().remove(key);
            warn!(%key, "No async runtime available; refresh deferred");
            return RefreshOutcome::Deferred;
        };

        let inner = Arc::clone(&self.inner);
        let key = key.clone();
        runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            inner.scheduled().remove(&key);
            if inner.store.subscriber_count(&key) == 0 {
                debug!(%key, "Subscribers left before refresh; deferring");
                return;
            }
            if let Err(err) = inner.refetch(&key).await {
                warn!(%key, "Background refresh failed: {err}");
            }
        });
        RefreshOutcome::Scheduled
    }
}

impl<T, S> Inner<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Source<T>,
{
    fn scheduled(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.scheduled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refetch(&self, key: &CacheKey) -> Result<T> {
        let value = <S as Source<T>>::fetch(&self.source, key).await?;
        if self.store.set_if_settled(key, value.clone()) {
            debug!(%key, "Refreshed entry");
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resync_core::SyncError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicU32,
        fail: bool,
    }

    impl Source<u32> for CountingSource {
        async fn fetch(&self, _key: &CacheKey) -> Result<u32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail {
                return Err(SyncError::TransientNetwork("offline".into()));
            }
            Ok(call * 100)
        }
    }

    fn key() -> CacheKey {
        CacheKey::resource("reviews").with("received")
    }

    fn dispatcher(source: CountingSource) -> (InvalidationDispatcher<u32, CountingSource>, Arc<CountingSource>) {
        let source = Arc::new(source);
        let store = Arc::new(CacheStore::new());
        let config = InvalidationConfig { debounce_ms: 100 };
        (InvalidationDispatcher::new(store, Arc::clone(&source), &config), source)
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_requests_within_window_fetch_once() {
        let (dispatcher, source) = dispatcher(CountingSource::default());
        dispatcher.store().set(&key(), 1);
        let _view = dispatcher.subscribe(&key());

        assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Scheduled);
        for _ in 0..9 {
            assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Coalesced);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let entry = dispatcher.store().get(&key()).unwrap_or_else(|| panic!("entry"));
        assert_eq!(entry.value, 100);
        assert!(!entry.is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn new_window_opens_after_debounce() {
        let (dispatcher, source) = dispatcher(CountingSource::default());
        dispatcher.store().set(&key(), 1);
        let _view = dispatcher.subscribe(&key());

        dispatcher.schedule_refresh(&key());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Scheduled);
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unobserved_keys_are_deferred_until_subscribed() {
        let (dispatcher, source) = dispatcher(CountingSource::default());
        dispatcher.store().set(&key(), 1);

        assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Deferred);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
        assert!(dispatcher.store().get(&key()).is_some_and(|entry| entry.is_stale));

        let view = dispatcher.subscribe(&key());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(view.current().map(|entry| entry.value), Some(100));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribing_to_fresh_entry_does_not_fetch() {
        let (dispatcher, source) = dispatcher(CountingSource::default());
        dispatcher.store().set(&key(), 1);
        let _view = dispatcher.subscribe(&key());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_stale_value() {
        let (dispatcher, source) = dispatcher(CountingSource {
            fail: true,
            ..CountingSource::default()
        });
        dispatcher.store().set(&key(), 7);
        let _view = dispatcher.subscribe(&key());

        dispatcher.schedule_refresh(&key());
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        let entry = dispatcher.store().get(&key()).unwrap_or_else(|| panic!("entry"));
        assert_eq!(entry.value, 7);
        assert!(entry.is_stale);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_now_skips_debounce() -> Result<()> {
        let (dispatcher, source) = dispatcher(CountingSource::default());
        let value = dispatcher.refresh_now(&key()).await?;
        assert_eq!(value, 100);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.store().value(&key()), Some(100));
        Ok(())
    }

    #[test]
    fn outside_runtime_requests_are_deferred() {
        let (dispatcher, _source) = dispatcher(CountingSource::default());
        dispatcher.store().set(&key(), 1);
        let _view = dispatcher.store().subscribe(&key());
        assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Deferred);
        assert_eq!(dispatcher.schedule_refresh(&key()), RefreshOutcome::Deferred);
    }
}
