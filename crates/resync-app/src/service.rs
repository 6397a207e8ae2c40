//! Entry point wiring the store, executor, dispatcher and poller together.

use std::future::Future;
use std::sync::Arc;

use reqwest::Url;
use resync_core::{CacheKey, Result, SyncError};
use resync_notify::Notifier;
use resync_store::{CacheStore, Subscription};
use tracing::{debug, info};

use crate::config::ProjectConfig;
use crate::invalidation::{InvalidationDispatcher, RefreshOutcome};
use crate::list_mutation::{ListItem, ListMutation};
use crate::mutation::{Mutation, MutationExecutor, PendingMutation};
use crate::poller::{PollHandle, PollOutcome, PollState, ReconciliationPoller};
use crate::redirect::{RedirectSignal, strip_signal};
use crate::source::Source;

/// Result of handling a redirect-completion signal.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectReconciliation<T> {
    /// Signal found on the return URL.
    pub signal: RedirectSignal,
    /// Poll outcome; `None` when the status was not a success.
    pub outcome: Option<PollOutcome<T>>,
    /// URL to put in place of the current history entry, if it should change.
    pub replace_url: Option<Url>,
}

/// One shared cache with everything that reads and writes it.
pub struct SyncService<T, S> {
    config: ProjectConfig,
    store: Arc<CacheStore<T>>,
    dispatcher: InvalidationDispatcher<T, S>,
    executor: MutationExecutor<T, S>,
    poller: ReconciliationPoller<T, S>,
    notifier: Notifier,
}

impl<T, S> Clone for SyncService<T, S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            dispatcher: self.dispatcher.clone(),
            executor: self.executor.clone(),
            poller: self.poller.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<T, S> SyncService<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Source<T>,
{
    /// Build the service around a fresh store.
    #[must_use]
    pub fn new(source: S, config: ProjectConfig, notifier: Notifier) -> Self {
        Self::with_store(Arc::new(CacheStore::new()), source, config, notifier)
    }

    /// Build the service around an existing store.
    #[must_use]
    pub fn with_store(store: Arc<CacheStore<T>>, source: S, config: ProjectConfig, notifier: Notifier) -> Self {
        let source = Arc::new(source);
        let dispatcher = InvalidationDispatcher::new(Arc::clone(&store), Arc::clone(&source), &config.invalidation);
        let executor = MutationExecutor::new(dispatcher.clone(), notifier.clone());
        let poller = ReconciliationPoller::new(config.poll.clone(), source, dispatcher.clone(), notifier.clone());
        Self {
            config,
            store,
            dispatcher,
            executor,
            poller,
            notifier,
        }
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Shared cache store.
    #[must_use]
    pub const fn store(&self) -> &Arc<CacheStore<T>> {
        &self.store
    }

    /// Notifier used for every notice.
    #[must_use]
    pub const fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Observe `key`, loading it in the background when missing or stale.
    #[must_use]
    pub fn subscribe(&self, key: &CacheKey) -> Subscription<T> {
        self.dispatcher.subscribe(key)
    }

    /// Mark `key` stale and refresh it if anyone is reading it.
    pub fn schedule_refresh(&self, key: &CacheKey) -> RefreshOutcome {
        self.dispatcher.schedule_refresh(key)
    }

    /// Fetch `key` now and store the result.
    ///
    /// # Errors
    /// Returns the classified fetch error.
    pub async fn refresh_now(&self, key: &CacheKey) -> Result<T> {
        self.dispatcher.refresh_now(key).await
    }

    /// Run a mutation; see [`MutationExecutor::execute`].
    ///
    /// # Errors
    /// Returns the remote call's error after rolling back.
    pub async fn mutate<R, E, Fut>(&self, mutation: Mutation<T>, remote: Fut) -> Result<R>
    where
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Into<SyncError>,
    {
        self.executor.execute(mutation, remote).await
    }

    /// Mutations still waiting on their remote call.
    #[must_use]
    pub fn pending_mutations(&self) -> Vec<PendingMutation<T>> {
        self.executor.pending()
    }

    /// Start a reconciliation poll for `key`.
    ///
    /// # Errors
    /// Returns [`SyncError::PollActive`] when `key` is already being polled.
    pub fn start_poll<P>(&self, key: CacheKey, predicate: P) -> Result<PollHandle<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.poller.start(key, predicate)
    }

    /// State of the poll for `key`.
    #[must_use]
    pub fn poll_state(&self, key: &CacheKey) -> PollState {
        self.poller.state(key)
    }

    /// Handle a page load that may carry a redirect-completion signal.
    ///
    /// Returns `Ok(None)` when `url` has no signal. A success status polls
    /// `key` until `predicate` holds; once the poll reaches a terminal state
    /// the signal is stripped from the URL. A non-success status is stripped
    /// without polling.
    ///
    /// # Errors
    /// Returns [`SyncError::PollActive`] when `key` is already being polled.
    pub async fn reconcile_redirect<P>(
        &self,
        url: &Url,
        key: CacheKey,
        predicate: P,
    ) -> Result<Option<RedirectReconciliation<T>>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let Some(signal) = RedirectSignal::detect(url, &self.config.redirect) else {
            return Ok(None);
        };
        if !signal.success {
            debug!(status = %signal.status, "Redirect did not succeed; nothing to reconcile");
            return Ok(Some(RedirectReconciliation {
                signal,
                outcome: None,
                replace_url: Some(strip_signal(url, &self.config.redirect)),
            }));
        }

        info!(%key, correlation = ?signal.correlation, "Redirect completed; reconciling");
        let outcome = self.poller.start(key, predicate)?.outcome().await;
        let replace_url = outcome
            .is_terminal()
            .then(|| strip_signal(url, &self.config.redirect));
        Ok(Some(RedirectReconciliation {
            signal,
            outcome: Some(outcome),
            replace_url,
        }))
    }
}

impl<I, S> SyncService<Vec<I>, S>
where
    I: ListItem,
    S: Source<Vec<I>>,
{
    /// Apply a typed list change optimistically and run `remote`.
    ///
    /// # Errors
    /// Returns the remote call's error after rolling back.
    pub async fn apply_list<R, E, Fut>(
        &self,
        key: CacheKey,
        change: ListMutation<I>,
        dependents: impl IntoIterator<Item = CacheKey>,
        remote: Fut,
    ) -> Result<R>
    where
        Fut: Future<Output = std::result::Result<R, E>>,
        E: Into<SyncError>,
    {
        debug!(%key, kind = change.kind(), target = ?change.target(), "Applying list mutation");
        let mutation = dependents
            .into_iter()
            .fold(change.into_mutation(key), Mutation::invalidates);
        self.executor.execute(mutation, remote).await
    }
}
