//! Application layer logic for resync.
//!
//! This crate wires the cache store to remote sources: optimistic mutations
//! with rollback, debounced invalidation, bounded reconciliation polling after
//! redirect flows, and the configuration that tunes them.

pub mod config;
pub mod http_source;
pub mod invalidation;
pub mod list_mutation;
pub mod mutation;
pub mod poller;
pub mod redirect;
pub mod service;
pub mod source;

// Re-exports for convenience
pub use config::{HttpConfig, InvalidationConfig, PollConfig, ProjectConfig, RedirectConfig};
pub use http_source::HttpSource;
pub use invalidation::{InvalidationDispatcher, RefreshOutcome};
pub use list_mutation::{ListItem, ListMutation};
pub use mutation::{Mutation, MutationExecutor, PendingMutation};
pub use poller::{PollHandle, PollOutcome, PollSession, PollState, ReconciliationPoller};
pub use redirect::{RedirectSignal, strip_signal};
pub use service::{RedirectReconciliation, SyncService};
pub use source::Source;
