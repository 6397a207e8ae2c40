use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::id::MutationId;
use crate::key::CacheKey;

/// Latest known value for a cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Key that owns the entry.
    pub key: CacheKey,
    /// Cached value (confirmed or optimistic).
    pub value: T,
    /// When the value was last written from a fetch or explicit set.
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    /// Set by invalidation; the value is kept and served while refetching.
    pub is_stale: bool,
    /// Mutation currently holding an optimistic value in this entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optimistic: Option<MutationId>,
}

impl<T> CacheEntry<T> {
    /// Entry holding a server-confirmed value.
    pub const fn confirmed(key: CacheKey, value: T, fetched_at: OffsetDateTime) -> Self {
        Self {
            key,
            value,
            fetched_at,
            is_stale: false,
            optimistic: None,
        }
    }

    /// Returns true while an optimistic value awaits settlement.
    #[must_use]
    pub const fn is_optimistic(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Age of the value relative to `now`.
    #[must_use]
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.fetched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn confirmed_entries_are_fresh() {
        let at = datetime!(2025-01-01 00:00 UTC);
        let entry = CacheEntry::confirmed(CacheKey::resource("reviews"), vec![1, 2], at);
        assert!(!entry.is_stale);
        assert!(!entry.is_optimistic());
        assert_eq!(entry.age(datetime!(2025-01-01 00:00:30 UTC)), time::Duration::seconds(30));
    }

    #[test]
    fn serializes_timestamp_as_rfc3339() -> Result<(), serde_json::Error> {
        let at = datetime!(2025-03-04 05:06:07 UTC);
        let entry = CacheEntry::confirmed(CacheKey::resource("cards").with("cus_1"), 3_u32, at);
        let json = serde_json::to_value(&entry)?;
        assert_eq!(json["fetched_at"], "2025-03-04T05:06:07Z");
        assert_eq!(json["key"], serde_json::json!(["cards", "cus_1"]));
        assert!(json.get("optimistic").is_none());

        let back: CacheEntry<u32> = serde_json::from_value(json)?;
        assert_eq!(back, entry);
        Ok(())
    }
}
