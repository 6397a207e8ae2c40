//! Domain types for optimistic cache reconciliation.

/// Cache entry definitions.
pub mod entry;
/// Error taxonomy.
pub mod error;
/// Identifier types.
pub mod id;
/// Structural cache keys.
pub mod key;

pub use entry::CacheEntry;
pub use error::{ErrorKind, Result, SyncError, classify_status};
pub use id::MutationId;
pub use key::{CacheKey, KeyPart};
