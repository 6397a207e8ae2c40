//! Bounded reconciliation polling after redirect-based flows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use resync_core::{CacheKey, Result, SyncError};
use resync_notify::Notifier;
use resync_store::CacheStore;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::invalidation::InvalidationDispatcher;
use crate::source::Source;

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Where a key's poll currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No session is running.
    Idle,
    /// A session is waiting for its next tick or fetch.
    Polling {
        /// Fetches issued so far.
        attempt: u32,
        /// Budget of the session.
        max_attempts: u32,
    },
}

/// How a poll session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The predicate held for a fetched value, which is now in the store.
    Satisfied {
        /// Value that satisfied the predicate.
        value: T,
        /// Fetches issued, including the successful one.
        attempts: u32,
    },
    /// Every attempt was spent without the predicate holding.
    TimedOut {
        /// Fetches issued.
        attempts: u32,
    },
    /// A non-transient error stopped the session early.
    Failed {
        /// Error returned by the source.
        error: SyncError,
        /// Fetches issued, including the failing one.
        attempts: u32,
    },
    /// The consumer cancelled or dropped the session.
    Cancelled {
        /// Fetches issued before cancellation.
        attempts: u32,
    },
}

impl<T> PollOutcome<T> {
    /// Number of fetches the session issued.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Satisfied { attempts, .. }
            | Self::TimedOut { attempts }
            | Self::Failed { attempts, .. }
            | Self::Cancelled { attempts } => *attempts,
        }
    }

    /// Returns true when the redirect signal should be cleared.
    ///
    /// A cancelled session leaves the signal in place so that the next mount
    /// can resume the poll.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Cancelled { .. })
    }

    /// Convert into the satisfied value or the matching error.
    ///
    /// # Errors
    /// Timeouts become [`SyncError::PollTimeout`], failures return their
    /// error, and cancelled sessions report a timeout for the attempts made.
    pub fn into_result(self, key: &CacheKey) -> Result<T> {
        match self {
            Self::Satisfied { value, .. } => Ok(value),
            Self::Failed { error, .. } => Err(error),
            Self::TimedOut { attempts } | Self::Cancelled { attempts } => Err(SyncError::PollTimeout {
                key: key.clone(),
                attempts,
            }),
        }
    }
}

/// One active poll: the key, its predicate, and how far it got.
pub struct PollSession<T> {
    target_key: CacheKey,
    predicate: Predicate<T>,
    attempt: u32,
    max_attempts: u32,
    interval: Duration,
    started_at: OffsetDateTime,
}

impl<T> PollSession<T> {
    fn new(target_key: CacheKey, predicate: Predicate<T>, config: &PollConfig) -> Self {
        Self {
            target_key,
            predicate,
            attempt: 0,
            max_attempts: config.max_attempts,
            interval: config.interval(),
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// Key being polled.
    #[must_use]
    pub const fn target_key(&self) -> &CacheKey {
        &self.target_key
    }

    /// Fetches issued so far.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay between fetches.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// When the session was created.
    #[must_use]
    pub const fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    const fn exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

impl<T> std::fmt::Debug for PollSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSession")
            .field("target_key", &self.target_key)
            .field("attempt", &self.attempt)
            .field("max_attempts", &self.max_attempts)
            .field("interval", &self.interval)
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

type ActiveMap = Arc<Mutex<HashMap<CacheKey, PollState>>>;

fn active(map: &ActiveMap) -> MutexGuard<'_, HashMap<CacheKey, PollState>> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes the key from the active map however the session task ends.
struct ActiveEntry {
    map: ActiveMap,
    key: CacheKey,
}

impl ActiveEntry {
    fn record(&self, session_attempt: u32, max_attempts: u32) {
        if let Some(state) = active(&self.map).get_mut(&self.key) {
            *state = PollState::Polling {
                attempt: session_attempt,
                max_attempts,
            };
        }
    }
}

impl Drop for ActiveEntry {
    fn drop(&mut self) {
        active(&self.map).remove(&self.key);
    }
}

/// Handle to a running poll session.
///
/// Dropping the handle cancels the session.
#[derive(Debug)]
pub struct PollHandle<T> {
    key: CacheKey,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<PollOutcome<T>>>,
}

impl<T> PollHandle<T> {
    /// Key being polled.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Stop issuing fetches; a fetch already in flight is discarded.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    /// Wait for the session to end.
    pub async fn outcome(mut self) -> PollOutcome<T> {
        let Some(task) = self.task.take() else {
            return PollOutcome::Cancelled { attempts: 0 };
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => PollOutcome::Cancelled { attempts: 0 },
        }
    }
}

impl<T> Drop for PollHandle<T> {
    fn drop(&mut self) {
        self.cancel.send_replace(true);
    }
}

/// Starts and tracks poll sessions, at most one per key.
pub struct ReconciliationPoller<T, S> {
    config: PollConfig,
    store: Arc<CacheStore<T>>,
    source: Arc<S>,
    dispatcher: InvalidationDispatcher<T, S>,
    notifier: Notifier,
    active: ActiveMap,
}

impl<T, S> Clone for ReconciliationPoller<T, S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            dispatcher: self.dispatcher.clone(),
            notifier: self.notifier.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl<T, S> ReconciliationPoller<T, S>
where
    T: Clone + Send + Sync + 'static,
    S: Source<T>,
{
    /// Create a poller that writes satisfied values into the dispatcher's store.
    #[must_use]
    pub fn new(config: PollConfig, source: Arc<S>, dispatcher: InvalidationDispatcher<T, S>, notifier: Notifier) -> Self {
        Self {
            config,
            store: Arc::clone(dispatcher.store()),
            source,
            dispatcher,
            notifier,
            active: Arc::default(),
        }
    }

    /// Poll budget used for new sessions.
    #[must_use]
    pub const fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Current state of the session for `key`.
    #[must_use]
    pub fn state(&self, key: &CacheKey) -> PollState {
        active(&self.active).get(key).copied().unwrap_or(PollState::Idle)
    }

    /// Start polling `key` until `predicate` holds for a fetched value.
    ///
    /// The first fetch happens one interval after the start.
    ///
    /// # Errors
    /// Returns [`SyncError::PollActive`] when a session for `key` is already
    /// running, and [`SyncError::NoRuntime`] when called outside a Tokio
    /// runtime.
    pub fn start<P>(&self, key: CacheKey, predicate: P) -> Result<PollHandle<T>>
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!(%key, "No async runtime available; poll not started");
            return Err(SyncError::NoRuntime(key));
        };
        let session = PollSession::new(key.clone(), Box::new(predicate), &self.config);
        {
            let mut active = active(&self.active);
            if active.contains_key(&key) {
                return Err(SyncError::PollActive(key));
            }
            active.insert(
                key.clone(),
                PollState::Polling {
                    attempt: 0,
                    max_attempts: session.max_attempts,
                },
            );
        }
        let entry = ActiveEntry {
            map: Arc::clone(&self.active),
            key: key.clone(),
        };

        let (cancel, cancelled) = watch::channel(false);
        info!(%key, max_attempts = session.max_attempts, interval_ms = self.config.interval_ms, "Starting reconciliation poll");
        let poller = self.clone();
        let task = runtime.spawn(async move { poller.run(session, cancelled, &entry).await });
        Ok(PollHandle {
            key,
            cancel,
            task: Some(task),
        })
    }

    async fn run(&self, mut session: PollSession<T>, mut cancel: watch::Receiver<bool>, entry: &ActiveEntry) -> PollOutcome<T> {
        let key = session.target_key.clone();
        let mut ticker = tokio::time::interval_at(Instant::now() + session.interval, session.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancelled(&mut cancel) => {
                    debug!(%key, attempt = session.attempt, "Poll cancelled");
                    return PollOutcome::Cancelled { attempts: session.attempt };
                }
                _ = ticker.tick() => {}
            }

            session.attempt += 1;
            entry.record(session.attempt, session.max_attempts);
            let fetched = tokio::select! {
                biased;
                () = cancelled(&mut cancel) => {
                    debug!(%key, attempt = session.attempt, "Poll cancelled during fetch; discarding result");
                    return PollOutcome::Cancelled { attempts: session.attempt };
                }
                fetched = <S as Source<T>>::fetch(&self.source, &key) => fetched,
            };

            match fetched {
                Ok(value) if (session.predicate)(&value) => {
                    self.store.set(&key, value.clone());
                    info!(%key, attempt = session.attempt, "Reconciliation poll satisfied");
                    self.notifier.poll_satisfied(&key);
                    return PollOutcome::Satisfied {
                        value,
                        attempts: session.attempt,
                    };
                }
                Ok(_) => debug!(%key, attempt = session.attempt, "Change not visible yet"),
                Err(err) if err.is_transient() => {
                    warn!(%key, attempt = session.attempt, "Poll fetch failed, will retry: {err}");
                }
                Err(error) => {
                    warn!(%key, attempt = session.attempt, kind = ?error.kind(), "Poll stopped: {error}");
                    self.notifier.poll_failed(&key, &error);
                    return PollOutcome::Failed {
                        error,
                        attempts: session.attempt,
                    };
                }
            }

            if session.exhausted() {
                warn!(%key, attempts = session.attempt, "Reconciliation poll timed out");
                self.notifier.poll_timed_out(&key);
                if self.config.final_refresh {
                    self.dispatcher.schedule_refresh(&key);
                }
                return PollOutcome::TimedOut {
                    attempts: session.attempt,
                };
            }
        }
    }
}

/// Resolves once cancellation is requested or the handle is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvalidationConfig;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<u32>>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(responses: impl IntoIterator<Item = Result<Vec<u32>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Source<Vec<u32>> for Scripted {
        async fn fetch(&self, _key: &CacheKey) -> Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.responses.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
            next.unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn key() -> CacheKey {
        CacheKey::resource("payment-methods").with("cus_1")
    }

    fn poller(source: &Arc<Scripted>, max_attempts: u32) -> ReconciliationPoller<Vec<u32>, Scripted> {
        let store = Arc::new(CacheStore::new());
        let dispatcher = InvalidationDispatcher::new(store, Arc::clone(source), &InvalidationConfig::default());
        let config = PollConfig {
            max_attempts,
            interval_ms: 2000,
            final_refresh: false,
        };
        ReconciliationPoller::new(config, Arc::clone(source), dispatcher, Notifier::silent())
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_count_as_attempts() -> Result<()> {
        let source = Scripted::new([
            Err(SyncError::TransientNetwork("reset".into())),
            Ok(vec![1]),
            Ok(vec![1, 2]),
        ]);
        let poller = poller(&source, 6);
        let outcome = poller.start(key(), |cards: &Vec<u32>| cards.len() >= 2)?.outcome().await;
        assert_eq!(
            outcome,
            PollOutcome::Satisfied {
                value: vec![1, 2],
                attempts: 3
            }
        );
        assert_eq!(source.calls(), 3);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn authorization_error_stops_polling() -> Result<()> {
        let source = Scripted::new([Err(SyncError::Authorization("expired".into()))]);
        let poller = poller(&source, 6);
        let outcome = poller.start(key(), |_: &Vec<u32>| true)?.outcome().await;
        assert_eq!(
            outcome,
            PollOutcome::Failed {
                error: SyncError::Authorization("expired".into()),
                attempts: 1
            }
        );
        assert!(outcome.is_terminal());
        assert_eq!(source.calls(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn second_session_for_same_key_is_rejected() -> Result<()> {
        let source = Scripted::new([]);
        let poller = poller(&source, 2);
        let handle = poller.start(key(), |_: &Vec<u32>| false)?;
        assert!(matches!(poller.state(&key()), PollState::Polling { attempt: 0, max_attempts: 2 }));
        assert!(matches!(
            poller.start(key(), |_: &Vec<u32>| false),
            Err(SyncError::PollActive(_))
        ));

        assert_eq!(handle.outcome().await, PollOutcome::TimedOut { attempts: 2 });
        assert_eq!(poller.state(&key()), PollState::Idle);
        assert!(poller.start(key(), |_: &Vec<u32>| true).is_ok());
        Ok(())
    }

    #[test]
    fn start_outside_runtime_is_an_error() {
        let source = Scripted::new([]);
        let poller = poller(&source, 2);
        assert!(matches!(
            poller.start(key(), |_: &Vec<u32>| true),
            Err(SyncError::NoRuntime(_))
        ));
        assert_eq!(poller.state(&key()), PollState::Idle);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_ticks() -> Result<()> {
        let source = Scripted::new([]);
        let poller = poller(&source, 6);
        let handle = poller.start(key(), |_: &Vec<u32>| false)?;
        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(source.calls(), 2);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 2);
        assert_eq!(poller.state(&key()), PollState::Idle);
        Ok(())
    }

    #[test]
    fn timeout_converts_into_poll_timeout_error() {
        let outcome: PollOutcome<Vec<u32>> = PollOutcome::TimedOut { attempts: 6 };
        assert_eq!(outcome.attempts(), 6);
        assert_eq!(
            outcome.into_result(&key()),
            Err(SyncError::PollTimeout {
                key: key(),
                attempts: 6
            })
        );
        assert!(!PollOutcome::<u32>::Cancelled { attempts: 0 }.is_terminal());
    }
}
