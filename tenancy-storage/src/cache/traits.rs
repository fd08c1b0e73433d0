//! Cache backend trait.
//!
//! Backends are plain key-value stores for resolver entries. They need
//! per-key atomicity and nothing more; expiry is judged by the resolver
//! against its clock.

use async_trait::async_trait;
use std::sync::Arc;
use tenancy_core::CacheError;

use super::entry::CacheEntry;
use super::key::ResolverKey;

/// Cache backend trait for pluggable cache implementations.
///
/// Implementations must be safe for concurrent use. `put` overwrites any
/// existing entry for the key, positive or negative.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the entry stored under `key`, expired or not.
    async fn get(&self, key: &ResolverKey) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `entry` under `key`, replacing any previous entry.
    async fn put(&self, key: &ResolverKey, entry: CacheEntry) -> Result<(), CacheError>;

    /// Remove the entry under `key`.
    ///
    /// Returns whether an entry was present. Deleting an absent key is not
    /// an error.
    async fn delete(&self, key: &ResolverKey) -> Result<bool, CacheError>;

    /// Remove every entry, returning how many were removed.
    async fn clear(&self) -> Result<u64, CacheError>;

    /// Get cache statistics.
    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

#[async_trait]
impl<C: CacheBackend + ?Sized> CacheBackend for Arc<C> {
    async fn get(&self, key: &ResolverKey) -> Result<Option<CacheEntry>, CacheError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &ResolverKey, entry: CacheEntry) -> Result<(), CacheError> {
        (**self).put(key, entry).await
    }

    async fn delete(&self, key: &ResolverKey) -> Result<bool, CacheError> {
        (**self).delete(key).await
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        (**self).clear().await
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        (**self).stats().await
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups that found an entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
    /// Number of entries currently stored.
    pub entry_count: u64,
    /// Number of entries evicted for capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
