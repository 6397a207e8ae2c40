//! Notice delivery logic

use std::sync::Arc;

use resync_core::{CacheKey, MutationId, SyncError};
use tracing::warn;

use crate::{Notice, NoticeKind, NoticeSink, NotifyConfig};

/// Builds notices and fans them out to the configured sinks
///
/// Delivery is fire-and-forget: a failing sink is logged and skipped, and
/// never fails the mutation or poll that produced the notice.
#[derive(Clone, Default)]
pub struct Notifier {
    config: NotifyConfig,
    sinks: Vec<Arc<dyn NoticeSink>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("config", &self.config)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl Notifier {
    /// Create a notifier without sinks
    #[must_use]
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            sinks: Vec::new(),
        }
    }

    /// Notifier that drops every notice
    #[must_use]
    pub fn silent() -> Self {
        Self::new(NotifyConfig {
            enabled: false,
            ..NotifyConfig::default()
        })
    }

    /// Add a sink
    #[must_use]
    pub fn with_sink(mut self, sink: impl NoticeSink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Borrow the configuration
    #[must_use]
    pub const fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Deliver a notice to every sink, applying configured overrides
    ///
    /// Returns the notice as delivered, or `None` when the kind is muted.
    pub fn emit(&self, mut notice: Notice) -> Option<Notice> {
        if !self.config.is_enabled(notice.kind) {
            return None;
        }
        if notice.error.is_none() {
            if let Some(message) = self.config.message_for(notice.kind) {
                message.clone_into(&mut notice.message);
            }
        }
        for sink in &self.sinks {
            if let Err(err) = sink.deliver(&notice) {
                warn!(kind = notice.kind.name(), key = %notice.key, "Notice delivery failed: {err}");
            }
        }
        Some(notice)
    }

    /// Notice for a mutation that was just issued
    pub fn mutation_started(&self, key: &CacheKey, mutation: MutationId) -> Option<Notice> {
        self.emit(Notice::new(NoticeKind::MutationStarted, key.clone()).with_mutation(mutation))
    }

    /// Notice for a mutation whose remote call succeeded
    pub fn mutation_succeeded(&self, key: &CacheKey, mutation: MutationId) -> Option<Notice> {
        self.emit(Notice::new(NoticeKind::MutationSucceeded, key.clone()).with_mutation(mutation))
    }

    /// Notice for a rolled-back mutation, carrying the error message
    pub fn mutation_failed(&self, key: &CacheKey, mutation: MutationId, err: &SyncError) -> Option<Notice> {
        self.emit(
            Notice::new(NoticeKind::MutationFailed, key.clone())
                .with_mutation(mutation)
                .with_error(err.kind(), err.user_message()),
        )
    }

    /// Notice for a poll that observed the awaited change
    pub fn poll_satisfied(&self, key: &CacheKey) -> Option<Notice> {
        self.emit(Notice::new(NoticeKind::PollSatisfied, key.clone()))
    }

    /// Notice for a poll that ran out of attempts
    pub fn poll_timed_out(&self, key: &CacheKey) -> Option<Notice> {
        self.emit(Notice::new(NoticeKind::PollTimedOut, key.clone()))
    }

    /// Notice for a poll stopped by a non-transient error
    pub fn poll_failed(&self, key: &CacheKey, err: &SyncError) -> Option<Notice> {
        self.emit(Notice::new(NoticeKind::PollFailed, key.clone()).with_error(err.kind(), err.user_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelSink, NotifyError, Result, Severity};
    use resync_core::ErrorKind;

    struct FailingSink;

    impl NoticeSink for FailingSink {
        fn deliver(&self, _notice: &Notice) -> Result<()> {
            Err(NotifyError::ChannelClosed)
        }
    }

    fn key() -> CacheKey {
        CacheKey::resource("ai-tutors").with("user-1")
    }

    #[test]
    fn failure_notice_carries_error_message() {
        let (sink, mut rx) = ChannelSink::channel();
        let notifier = Notifier::new(NotifyConfig::default()).with_sink(sink);
        let id = MutationId::new();

        notifier.mutation_failed(&key(), id, &SyncError::Authorization("session expired".into()));

        let Ok(notice) = rx.try_recv() else {
            panic!("notice must be delivered");
        };
        assert_eq!(notice.kind, NoticeKind::MutationFailed);
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.error, Some(ErrorKind::Authorization));
        assert_eq!(notice.message, "Not authorized: session expired");
        assert_eq!(notice.mutation, Some(id));
    }

    #[test]
    fn overrides_apply_to_plain_notices_only() {
        let mut config = NotifyConfig::default();
        config.messages.insert("mutation-succeeded".into(), "Tutor published".into());
        config.messages.insert("mutation-failed".into(), "ignored".into());
        let notifier = Notifier::new(config);

        let ok = notifier.mutation_succeeded(&key(), MutationId::new());
        assert_eq!(ok.map(|n| n.message), Some("Tutor published".to_owned()));

        let failed = notifier.mutation_failed(&key(), MutationId::new(), &SyncError::Validation("Name taken".into()));
        assert_eq!(failed.map(|n| n.message), Some("Name taken".to_owned()));
    }

    #[test]
    fn muted_kinds_are_not_delivered() {
        let (sink, mut rx) = ChannelSink::channel();
        let config = NotifyConfig {
            muted: vec!["mutation-started".into()],
            ..NotifyConfig::default()
        };
        let notifier = Notifier::new(config).with_sink(sink);

        assert!(notifier.mutation_started(&key(), MutationId::new()).is_none());
        assert!(rx.try_recv().is_err());
        assert!(Notifier::silent().poll_timed_out(&key()).is_none());
    }

    #[test]
    fn failing_sink_does_not_stop_other_sinks() {
        let (sink, mut rx) = ChannelSink::channel();
        let notifier = Notifier::new(NotifyConfig::default())
            .with_sink(FailingSink)
            .with_sink(sink);

        assert!(notifier.poll_satisfied(&key()).is_some());
        assert!(rx.try_recv().is_ok());
    }
}
