//! Cache-aside tenant identifier resolution.
//!
//! `TenantIdentifierResolver` maps slugs to database ids and back. Lookups go
//! to the cache first and fall back to the tenant directory on a miss. Both
//! outcomes are cached: positive results for `positive_ttl`, negative results
//! (missing or inactive tenant) for the much shorter `negative_ttl`.
//!
//! Directory failures are returned as `DirectoryUnavailable` and never
//! cached. Missing and inactive tenants both come back as `NotFound`; the
//! difference is only visible in server-side logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tenancy_core::{
    CacheError, Clock, ConfigError, DirectoryError, ResolutionError, ResolverConfig,
    SystemClock, TenantDbId, TenantDirectory, TenantIdentity, TenantLifecycleEvent,
    TenantRecord, TenantSlug,
};
use tracing::{debug, error, warn};

use crate::cache::{CacheBackend, CacheEntry, CachedOutcome, ResolverKey};
use crate::coalesce::MissCoalescer;

/// Counters describing resolver behaviour since construction.
#[derive(Debug, Default)]
pub struct ResolverStats {
    positive_hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    directory_queries: AtomicU64,
    directory_failures: AtomicU64,
    invalidations: AtomicU64,
}

impl ResolverStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough copy of the counters.
    pub fn snapshot(&self) -> ResolverStatsSnapshot {
        ResolverStatsSnapshot {
            positive_hits: self.positive_hits.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            directory_queries: self.directory_queries.load(Ordering::Relaxed),
            directory_failures: self.directory_failures.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of `ResolverStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverStatsSnapshot {
    pub positive_hits: u64,
    pub negative_hits: u64,
    pub misses: u64,
    pub directory_queries: u64,
    pub directory_failures: u64,
    pub invalidations: u64,
}

/// Resolves tenant slugs to database ids and back.
///
/// # Type Parameters
///
/// - `D`: the tenant directory consulted on cache miss
/// - `C`: the cache backend holding positive and negative entries
///
/// # Example
///
/// ```ignore
/// let resolver = TenantIdentifierResolver::new(directory, cache, ResolverConfig::default())?;
///
/// let slug = TenantSlug::parse("nrna")?;
/// match resolver.resolve_db_id(&slug).await {
///     Ok(db_id) => route_to_partition(db_id),
///     Err(ResolutionError::NotFound) => respond_404(),
///     Err(e) => respond_503(e),
/// }
/// ```
pub struct TenantIdentifierResolver<D, C>
where
    D: TenantDirectory,
    C: CacheBackend,
{
    directory: Arc<D>,
    cache: Arc<C>,
    clock: Arc<dyn Clock>,
    config: ResolverConfig,
    stats: Arc<ResolverStats>,
    coalescer: Option<Arc<MissCoalescer>>,
    /// Bumped by every `invalidate`, before it deletes anything.
    epoch: Arc<AtomicU64>,
}

impl<D, C> TenantIdentifierResolver<D, C>
where
    D: TenantDirectory,
    C: CacheBackend,
{
    /// Create a resolver using the system clock.
    pub fn new(directory: Arc<D>, cache: Arc<C>, config: ResolverConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let coalescer = config
            .coalesce_misses
            .then(|| Arc::new(MissCoalescer::new()));

        Ok(Self {
            directory,
            cache,
            clock: Arc::new(SystemClock),
            config,
            stats: Arc::new(ResolverStats::default()),
            coalescer,
            epoch: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Replace the clock used for TTL decisions.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Get the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Get a reference to the cache backend.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Get a reference to the tenant directory.
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Current resolver counters.
    pub fn stats(&self) -> ResolverStatsSnapshot {
        self.stats.snapshot()
    }

    // ========================================================================
    // RESOLUTION
    // ========================================================================

    /// Resolve a slug to the active tenant's database id.
    pub async fn resolve_db_id(&self, slug: &TenantSlug) -> Result<TenantDbId, ResolutionError> {
        self.resolve(ResolverKey::slug(slug))
            .await
            .map(|identity| identity.db_id)
    }

    /// Resolve a database id to the active tenant's slug.
    pub async fn resolve_slug(&self, db_id: TenantDbId) -> Result<TenantSlug, ResolutionError> {
        self.resolve(ResolverKey::db_id(db_id))
            .await
            .map(|identity| identity.slug)
    }

    /// Validate a raw slug, then resolve it.
    ///
    /// Validation failures return `InvalidIdentifier` without touching the
    /// cache or the directory.
    pub async fn resolve_raw_slug(&self, raw: &str) -> Result<TenantDbId, ResolutionError> {
        let slug = TenantSlug::parse(raw)?;
        self.resolve_db_id(&slug).await
    }

    /// Extract the tenant slug from a request host, then resolve it.
    pub async fn resolve_host(&self, host: &str) -> Result<TenantIdentity, ResolutionError> {
        let slug = TenantSlug::from_host(host)?;
        let db_id = self.resolve_db_id(&slug).await?;
        Ok(TenantIdentity::new(slug, db_id))
    }

    async fn resolve(&self, key: ResolverKey) -> Result<TenantIdentity, ResolutionError> {
        if let Some(outcome) = self.lookup_cached(&key).await {
            return self.answer_from_cache(&key, outcome);
        }

        match &self.coalescer {
            Some(coalescer) => {
                let encoded = key.encode();
                let _flight = coalescer.acquire(&encoded).await;
                // Another caller may have filled the entry while we waited.
                if let Some(outcome) = self.lookup_cached(&key).await {
                    return self.answer_from_cache(&key, outcome);
                }
                self.fetch_and_cache(&key).await
            }
            None => self.fetch_and_cache(&key).await,
        }
    }

    /// Return the live cached outcome for `key`, if any.
    ///
    /// Backend errors, expired entries and entries that do not belong to the
    /// key all count as a miss.
    async fn lookup_cached(&self, key: &ResolverKey) -> Option<CachedOutcome> {
        let entry = match self.cache.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, falling back to directory");
                return None;
            }
        };

        let now = self.clock.now();
        if !entry.is_live(now) {
            debug!(key = %key, expired_at = %entry.expires_at, "Cache entry expired");
            return None;
        }
        if !entry.matches_key(key) {
            warn!(key = %key, "Cache entry does not belong to its key, ignoring");
            return None;
        }
        Some(entry.outcome)
    }

    fn answer_from_cache(
        &self,
        key: &ResolverKey,
        outcome: CachedOutcome,
    ) -> Result<TenantIdentity, ResolutionError> {
        match outcome {
            CachedOutcome::Resolved { identity } => {
                ResolverStats::bump(&self.stats.positive_hits);
                debug!(key = %key, "Cache hit");
                Ok(identity)
            }
            CachedOutcome::Absent => {
                ResolverStats::bump(&self.stats.negative_hits);
                debug!(key = %key, "Negative cache hit");
                Err(ResolutionError::NotFound)
            }
        }
    }

    /// Query the directory, cache the outcome, and answer.
    async fn fetch_and_cache(&self, key: &ResolverKey) -> Result<TenantIdentity, ResolutionError> {
        ResolverStats::bump(&self.stats.misses);
        let epoch = self.epoch.load(Ordering::SeqCst);

        let record = match self.query_directory(key).await {
            Ok(record) => record,
            Err(e) => {
                ResolverStats::bump(&self.stats.directory_failures);
                error!(key = %key, error = %e, "Tenant directory lookup failed");
                return Err(e.into());
            }
        };

        let now = self.clock.now();
        match record {
            Some(record) if record.is_active() => {
                let identity = record.identity();
                let entry = CacheEntry::positive(identity.clone(), now, self.config.positive_ttl);
                if !entry.matches_key(key) {
                    ResolverStats::bump(&self.stats.directory_failures);
                    let e = DirectoryError::MalformedRecord {
                        reason: format!("record {}/{} returned for {}", record.slug, record.db_id, key),
                    };
                    error!(key = %key, error = %e, "Tenant directory returned a mismatched record");
                    return Err(e.into());
                }

                debug!(key = %key, db_id = %identity.db_id, "Resolved from directory");
                self.store(key, entry, epoch).await;
                Ok(identity)
            }
            Some(record) => {
                // Server-side only: callers see the same NotFound as for a missing tenant.
                debug!(key = %key, status = %record.status, "Tenant inactive, caching as absent");
                self.store(key, CacheEntry::negative(now, self.config.negative_ttl), epoch)
                    .await;
                Err(ResolutionError::NotFound)
            }
            None => {
                debug!(key = %key, "No such tenant, caching as absent");
                self.store(key, CacheEntry::negative(now, self.config.negative_ttl), epoch)
                    .await;
                Err(ResolutionError::NotFound)
            }
        }
    }

    async fn query_directory(&self, key: &ResolverKey) -> Result<Option<TenantRecord>, DirectoryError> {
        ResolverStats::bump(&self.stats.directory_queries);

        let timeout = self.config.directory_timeout;
        let lookup = async {
            match key {
                ResolverKey::Slug(slug) => self.directory.find_by_slug(slug).await,
                ResolverKey::DbId(id) => self.directory.find_by_db_id(*id).await,
            }
        };

        tokio::time::timeout(timeout, lookup)
            .await
            .map_err(|_| DirectoryError::Timeout { after: timeout })?
    }

    /// Cache `entry` unless an invalidation ran since the directory was read.
    ///
    /// The epoch is re-checked after the write: an invalidation that bumped it
    /// before the check is undone here, and one that bumps it later deletes
    /// the entry itself.
    async fn store(&self, key: &ResolverKey, entry: CacheEntry, read_epoch: u64) {
        if let Err(e) = self.cache.put(key, entry).await {
            warn!(key = %key, error = %e, "Cache write failed, result not cached");
            return;
        }

        if self.epoch.load(Ordering::SeqCst) != read_epoch {
            debug!(key = %key, "Invalidated during directory read, dropping entry");
            if let Err(e) = self.cache.delete(key).await {
                warn!(key = %key, error = %e, "Failed to drop entry written across an invalidation");
            }
        }
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Drop cached entries for `slug` and, if given, `db_id`.
    ///
    /// Removes positive and negative entries alike. Invalidating keys that
    /// are not cached is a no-op.
    ///
    /// A miss already in flight may have read the directory before the change
    /// being invalidated. It still returns what it read, but its cache write is
    /// dropped, so the stale result is not served afterwards.
    pub async fn invalidate(
        &self,
        slug: &TenantSlug,
        db_id: Option<TenantDbId>,
    ) -> Result<(), CacheError> {
        ResolverStats::bump(&self.stats.invalidations);
        self.epoch.fetch_add(1, Ordering::SeqCst);

        let slug_key = ResolverKey::slug(slug);
        let removed_slug = self.cache.delete(&slug_key).await?;

        let removed_id = match db_id {
            Some(id) => self.cache.delete(&ResolverKey::db_id(id)).await?,
            None => false,
        };

        debug!(
            slug = %slug,
            db_id = ?db_id.map(TenantDbId::get),
            removed_slug,
            removed_id,
            "Invalidated tenant cache entries"
        );
        Ok(())
    }

    /// Invalidate everything a lifecycle event may have made stale.
    ///
    /// Call this synchronously as part of the status change, rename or
    /// deletion, before that change is reported as complete.
    pub async fn on_lifecycle_event(&self, event: &TenantLifecycleEvent) -> Result<(), CacheError> {
        for (slug, db_id) in event.invalidation_targets() {
            self.invalidate(&slug, db_id).await?;
        }
        Ok(())
    }
}

impl<D, C> Clone for TenantIdentifierResolver<D, C>
where
    D: TenantDirectory,
    C: CacheBackend,
{
    fn clone(&self) -> Self {
        Self {
            directory: Arc::clone(&self.directory),
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            stats: Arc::clone(&self.stats),
            coalescer: self.coalescer.clone(),
            epoch: Arc::clone(&self.epoch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStats, InMemoryCacheBackend};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tenancy_core::TenantStatus;

    /// Directory that returns whatever record it holds, for any lookup.
    struct FixedDirectory(Mutex<Option<TenantRecord>>);

    #[async_trait]
    impl TenantDirectory for FixedDirectory {
        async fn find_by_slug(&self, _slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
            Ok(self.0.lock().unwrap().clone())
        }

        async fn find_by_db_id(&self, _id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    /// Directory that reads its record, then takes 50ms to answer.
    struct SlowDirectory(Mutex<Option<TenantRecord>>);

    #[async_trait]
    impl TenantDirectory for SlowDirectory {
        async fn find_by_slug(&self, _slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
            let snapshot = self.0.lock().unwrap().clone();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(snapshot)
        }

        async fn find_by_db_id(&self, _id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
            self.find_by_slug(&TenantSlug::parse("unused").unwrap()).await
        }
    }

    /// Cache whose every operation fails.
    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        async fn get(&self, _key: &ResolverKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Backend { reason: "disk full".to_string() })
        }

        async fn put(&self, _key: &ResolverKey, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Backend { reason: "disk full".to_string() })
        }

        async fn delete(&self, _key: &ResolverKey) -> Result<bool, CacheError> {
            Err(CacheError::Backend { reason: "disk full".to_string() })
        }

        async fn clear(&self) -> Result<u64, CacheError> {
            Ok(0)
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            Ok(CacheStats::default())
        }
    }

    fn record(slug: &str, id: i64, status: TenantStatus) -> TenantRecord {
        TenantRecord::from_raw(slug, id, status).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let directory = Arc::new(FixedDirectory(Mutex::new(None)));
        let cache = Arc::new(InMemoryCacheBackend::new());
        let config = ResolverConfig::new().with_negative_ttl(std::time::Duration::ZERO);

        assert!(TenantIdentifierResolver::new(directory, cache, config).is_err());
    }

    #[tokio::test]
    async fn test_mismatched_record_is_not_cached() {
        let directory = Arc::new(FixedDirectory(Mutex::new(Some(record(
            "other",
            9,
            TenantStatus::Active,
        )))));
        let cache = Arc::new(InMemoryCacheBackend::new());
        let resolver =
            TenantIdentifierResolver::new(directory, Arc::clone(&cache), ResolverConfig::default())
                .unwrap();

        let slug = TenantSlug::parse("nrna").unwrap();
        let result = resolver.resolve_db_id(&slug).await;

        assert!(matches!(result, Err(ResolutionError::DirectoryUnavailable { .. })));
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn test_broken_cache_still_resolves() {
        let directory = Arc::new(FixedDirectory(Mutex::new(Some(record(
            "nrna",
            42,
            TenantStatus::Active,
        )))));
        let resolver =
            TenantIdentifierResolver::new(directory, Arc::new(BrokenCache), ResolverConfig::default())
                .unwrap();

        let slug = TenantSlug::parse("nrna").unwrap();
        assert_eq!(resolver.resolve_db_id(&slug).await.unwrap().get(), 42);
        assert_eq!(resolver.resolve_db_id(&slug).await.unwrap().get(), 42);
        assert_eq!(resolver.stats().directory_queries, 2);
    }

    #[tokio::test]
    async fn test_broken_cache_fails_invalidation() {
        let directory = Arc::new(FixedDirectory(Mutex::new(None)));
        let resolver =
            TenantIdentifierResolver::new(directory, Arc::new(BrokenCache), ResolverConfig::default())
                .unwrap();

        let slug = TenantSlug::parse("nrna").unwrap();
        assert!(resolver.invalidate(&slug, None).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_host() {
        let directory = Arc::new(FixedDirectory(Mutex::new(Some(record(
            "nrna",
            42,
            TenantStatus::Active,
        )))));
        let resolver = TenantIdentifierResolver::new(
            directory,
            Arc::new(InMemoryCacheBackend::new()),
            ResolverConfig::default(),
        )
        .unwrap();

        let identity = resolver.resolve_host("nrna.example.com:443").await.unwrap();
        assert_eq!(identity.slug.as_str(), "nrna");
        assert_eq!(identity.db_id.get(), 42);

        assert!(matches!(
            resolver.resolve_host("localhost:8080").await,
            Err(ResolutionError::InvalidIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn test_clone_shares_stats() {
        let directory = Arc::new(FixedDirectory(Mutex::new(None)));
        let resolver = TenantIdentifierResolver::new(
            directory,
            Arc::new(InMemoryCacheBackend::new()),
            ResolverConfig::default(),
        )
        .unwrap();
        let clone = resolver.clone();

        let slug = TenantSlug::parse("ghost").unwrap();
        let _ = clone.resolve_db_id(&slug).await;

        assert_eq!(resolver.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_during_miss_drops_stale_entry() {
        let directory = Arc::new(SlowDirectory(Mutex::new(Some(record(
            "acme",
            5,
            TenantStatus::Active,
        )))));
        let cache = Arc::new(InMemoryCacheBackend::new());
        let resolver = TenantIdentifierResolver::new(
            Arc::clone(&directory),
            Arc::clone(&cache),
            ResolverConfig::default(),
        )
        .unwrap();
        let slug = TenantSlug::parse("acme").unwrap();

        let in_flight = {
            let resolver = resolver.clone();
            let slug = slug.clone();
            tokio::spawn(async move { resolver.resolve_db_id(&slug).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        // Deleted after the in-flight miss already read the record.
        directory.0.lock().unwrap().take();
        let event = TenantLifecycleEvent::Deleted {
            slug: slug.clone(),
            db_id: TenantDbId::new(5).unwrap(),
        };
        resolver.on_lifecycle_event(&event).await.unwrap();

        assert_eq!(in_flight.await.unwrap().unwrap().get(), 5);
        assert!(cache.get(&ResolverKey::slug(&slug)).await.unwrap().is_none());
        assert!(matches!(
            resolver.resolve_db_id(&slug).await,
            Err(ResolutionError::NotFound)
        ));
    }
}
