//! Authoritative read access to remote state.

use std::future::Future;
use std::sync::Arc;

use resync_core::{CacheKey, Result};

/// Remote collaborator that answers "what is the current value of `key`?".
///
/// Implementations convert every transport failure into the
/// [`SyncError`](resync_core::SyncError) taxonomy; raw transport errors never
/// cross this boundary.
pub trait Source<T>: Send + Sync + 'static {
    /// Fetch the authoritative value for `key`.
    ///
    /// # Errors
    /// Returns a classified error when the fetch fails.
    fn fetch(&self, key: &CacheKey) -> impl Future<Output = Result<T>> + Send;
}

impl<T, S> Source<T> for Arc<S>
where
    S: Source<T>,
{
    fn fetch(&self, key: &CacheKey) -> impl Future<Output = Result<T>> + Send {
        <S as Source<T>>::fetch(self, key)
    }
}
