//! Error taxonomy shared by every reconciliation component.

use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Result type for reconciliation operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors surfaced by mutations, fetches, and polls.
///
/// Every remote failure is converted into one of these variants before it
/// reaches view code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Connectivity failure or a server error worth retrying.
    #[error("Network error: {0}")]
    TransientNetwork(String),

    /// The session lacks permission for the operation.
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// The server rejected the payload; the message is passed through verbatim.
    #[error("{0}")]
    Validation(String),

    /// The attempt budget ran out before the awaited change was observed.
    #[error("Confirmation for {key} timed out after {attempts} attempts")]
    PollTimeout {
        /// Polled key
        key: CacheKey,
        /// Number of fetches issued
        attempts: u32,
    },

    /// A poll for the key is already running.
    #[error("A poll for {0} is already active")]
    PollActive(CacheKey),

    /// Background work was requested outside an async runtime.
    #[error("No async runtime available to poll {0}")]
    NoRuntime(CacheKey),
}

/// Coarse classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// See [`SyncError::TransientNetwork`]
    TransientNetwork,
    /// See [`SyncError::Authorization`]
    Authorization,
    /// See [`SyncError::Validation`]
    Validation,
    /// See [`SyncError::PollTimeout`]
    PollTimeout,
    /// See [`SyncError::PollActive`]
    PollActive,
    /// See [`SyncError::NoRuntime`]
    NoRuntime,
}

impl SyncError {
    /// Classification used for notices and retry decisions.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Validation(_) => ErrorKind::Validation,
            Self::PollTimeout { .. } => ErrorKind::PollTimeout,
            Self::PollActive(_) => ErrorKind::PollActive,
            Self::NoRuntime(_) => ErrorKind::NoRuntime,
        }
    }

    /// Returns true when repeating the request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Message suitable for a user-facing toast.
    ///
    /// Poll timeouts never claim failure: the operation may have completed
    /// server-side without being observed yet.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::PollTimeout { .. } => {
                "Your changes are still being confirmed. Refresh the page to see them.".to_owned()
            }
            other => other.to_string(),
        }
    }
}

/// Convert an HTTP status and server message into the taxonomy.
///
/// `401`/`403` map to authorization, `408`/`429`/`5xx` to transient network
/// errors, and any other non-success status to validation.
pub fn classify_status(status: u16, message: impl Into<String>) -> SyncError {
    let message = message.into();
    match status {
        401 | 403 => SyncError::Authorization(message),
        408 | 429 | 500..=599 => SyncError::TransientNetwork(message),
        _ => SyncError::Validation(message),
    }
}
