//! User-facing notices for mutations and reconciliation polls
//!
//! This crate turns reconciliation milestones (mutation start, success,
//! failure, poll confirmation, poll timeout or failure) into transient notices and
//! delivers them to pluggable sinks such as a toast channel or the log.

mod config;
mod error;
mod notifier;
mod sink;
mod types;

pub use config::NotifyConfig;
pub use error::{NotifyError, Result};
pub use notifier::Notifier;
pub use sink::{ChannelSink, JsonLinesSink, NoticeSink, TracingSink};
pub use types::{Notice, NoticeKind, Severity};
