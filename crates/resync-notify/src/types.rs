//! Notice types

use resync_core::{CacheKey, ErrorKind, MutationId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Reconciliation milestones that produce a user-facing notice
///
/// # Emission Order
///
/// For a mutation:
/// 1. `MutationStarted` before the remote call is issued
/// 2. `MutationSucceeded` or `MutationFailed` once it settles
///
/// For a redirect poll, exactly one of `PollSatisfied`, `PollTimedOut` or
/// `PollFailed` is emitted when the session reaches a terminal state.
/// Cancelled polls emit nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeKind {
    /// A mutation was issued ("Processing…")
    MutationStarted,

    /// The remote call behind a mutation succeeded
    MutationSucceeded,

    /// The remote call failed and the optimistic value was rolled back
    MutationFailed,

    /// A reconciliation poll observed the awaited change
    PollSatisfied,

    /// A reconciliation poll exhausted its attempts
    ///
    /// The underlying operation may still have succeeded, so the notice asks
    /// the user to refresh instead of reporting a failure.
    PollTimedOut,

    /// A reconciliation poll hit a non-transient error and stopped early
    PollFailed,
}

impl NoticeKind {
    /// Every kind, in emission order.
    pub const ALL: [Self; 6] = [
        Self::MutationStarted,
        Self::MutationSucceeded,
        Self::MutationFailed,
        Self::PollSatisfied,
        Self::PollTimedOut,
        Self::PollFailed,
    ];

    /// Stable name used in configuration files
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::MutationStarted => "mutation-started",
            Self::MutationSucceeded => "mutation-succeeded",
            Self::MutationFailed => "mutation-failed",
            Self::PollSatisfied => "poll-satisfied",
            Self::PollTimedOut => "poll-timed-out",
            Self::PollFailed => "poll-failed",
        }
    }

    /// Look up a kind by its configuration name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Display severity of the notice
    #[must_use]
    pub const fn severity(self) -> Severity {
        match self {
            Self::MutationStarted => Severity::Info,
            Self::MutationSucceeded | Self::PollSatisfied => Severity::Success,
            Self::MutationFailed | Self::PollFailed => Severity::Error,
            Self::PollTimedOut => Severity::Warning,
        }
    }

    /// Message used when the configuration does not override it
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::MutationStarted => "Processing…",
            Self::MutationSucceeded => "Changes saved",
            Self::MutationFailed => "Something went wrong",
            Self::PollSatisfied => "All set! Your changes are now visible",
            Self::PollTimedOut => "Still confirming your changes. Refresh the page to see them.",
            Self::PollFailed => "Could not confirm your changes",
        }
    }
}

/// How prominently a notice should be displayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Neutral progress message
    Info,
    /// Positive confirmation
    Success,
    /// Soft warning that needs no immediate action
    Warning,
    /// Failure the user should know about
    Error,
}

/// A single user-facing notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Milestone that produced the notice
    pub kind: NoticeKind,
    /// Display severity
    pub severity: Severity,
    /// Cache key the milestone concerns
    pub key: CacheKey,
    /// Text to display
    pub message: String,
    /// Mutation that produced the notice, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation: Option<MutationId>,
    /// Error classification for failure notices
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    /// When the notice was created
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

impl Notice {
    /// Create a notice with the kind's default message
    #[must_use]
    pub fn new(kind: NoticeKind, key: CacheKey) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            key,
            message: kind.default_message().to_owned(),
            mutation: None,
            error: None,
            at: OffsetDateTime::now_utc(),
        }
    }

    /// Attach the originating mutation
    #[must_use]
    pub const fn with_mutation(mut self, mutation: MutationId) -> Self {
        self.mutation = Some(mutation);
        self
    }

    /// Attach an error classification and replace the message
    #[must_use]
    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error = Some(kind);
        self.message = message.into();
        self
    }
}
