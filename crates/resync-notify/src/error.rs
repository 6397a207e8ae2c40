//! Error types for notice delivery

use std::io;

/// Result type for notice delivery
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors that can occur while delivering a notice
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The receiving side of a channel sink was dropped
    #[error("Notice channel closed")]
    ChannelClosed,

    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
