//! Notice sinks

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{Notice, NotifyError, Result, Severity};

/// Destination for delivered notices
///
/// Implementations must not block for long: notices are delivered inline
/// from mutation and poll code paths.
pub trait NoticeSink: Send + Sync {
    /// Deliver a single notice
    ///
    /// # Errors
    ///
    /// Returns an error if the sink can no longer accept notices.
    fn deliver(&self, notice: &Notice) -> Result<()>;
}

/// Sink that forwards notices to a tokio channel (e.g. a toast renderer)
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notice>,
}

impl ChannelSink {
    /// Create a sink together with the receiving end
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NoticeSink for ChannelSink {
    fn deliver(&self, notice: &Notice) -> Result<()> {
        self.tx
            .send(notice.clone())
            .map_err(|_| NotifyError::ChannelClosed)
    }
}

/// Sink that writes notices to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NoticeSink for TracingSink {
    fn deliver(&self, notice: &Notice) -> Result<()> {
        let kind = notice.kind.name();
        let key = &notice.key;
        match notice.severity {
            Severity::Info | Severity::Success => info!(kind, %key, "{}", notice.message),
            Severity::Warning => warn!(kind, %key, "{}", notice.message),
            Severity::Error => error!(kind, %key, "{}", notice.message),
        }
        Ok(())
    }
}

/// Sink that writes one JSON object per notice to a writer
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wrap a writer
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Recover the inner writer
    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> NoticeSink for JsonLinesSink<W> {
    fn deliver(&self, notice: &Notice) -> Result<()> {
        let line = serde_json::to_string(notice)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}
