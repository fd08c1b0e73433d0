//! In-process cache backend.
//!
//! A bounded `HashMap` behind `tokio::sync::RwLock`. When full, entries that
//! have already expired (relative to the incoming entry's `cached_at`) are
//! purged first; if that frees nothing, the entry closest to expiry is
//! evicted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tenancy_core::{CacheError, ResolverConfig, DEFAULT_MAX_ENTRIES};
use tokio::sync::RwLock;

use super::entry::CacheEntry;
use super::key::ResolverKey;
use super::traits::{CacheBackend, CacheStats};

/// Bounded in-memory cache backend.
#[derive(Debug)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<ResolverKey, CacheEntry>>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for InMemoryCacheBackend {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_ENTRIES)
    }
}

impl InMemoryCacheBackend {
    /// Create a backend with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend holding at most `max_entries` entries (minimum 1).
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create a backend sized by `config.max_entries`.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::with_capacity(config.max_entries)
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn make_room(&self, entries: &mut HashMap<ResolverKey, CacheEntry>, incoming: &CacheEntry) {
        let before = entries.len();
        entries.retain(|_, e| e.is_live(incoming.cached_at));
        let mut evicted = (before - entries.len()) as u64;

        if entries.len() >= self.max_entries {
            let victim = entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }
}

#[async_trait]
impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &ResolverKey) -> Result<Option<CacheEntry>, CacheError> {
        let entry = self.entries.read().await.get(key).cloned();
        match entry {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(entry)
    }

    async fn put(&self, key: &ResolverKey, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            self.make_room(&mut entries, &entry);
        }
        entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &ResolverKey) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.read().await.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
