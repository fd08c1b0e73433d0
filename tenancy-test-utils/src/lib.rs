//! Tenancy Test Utilities
//!
//! Shared test infrastructure for the tenancy workspace:
//! - An in-memory tenant directory with call counters and fault injection
//! - A manually advanced clock for TTL tests
//! - Proptest generators for identifiers and records
//! - Fixtures and assertions for resolution outcomes

pub use tenancy_core::{
    Clock, DirectoryError, ResolutionError, ResolverConfig, TenantDbId, TenantDirectory,
    TenantIdentity, TenantLifecycleEvent, TenantRecord, TenantSlug, TenantStatus,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// IN-MEMORY DIRECTORY
// ============================================================================

/// Tenant directory held in memory.
///
/// Mutators return the lifecycle event a real directory would emit, so tests
/// can feed it straight into the resolver.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    records: Mutex<HashMap<TenantDbId, TenantRecord>>,
    slug_lookups: AtomicUsize,
    id_lookups: AtomicUsize,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = TenantRecord>) -> Self {
        let directory = Self::new();
        for record in records {
            directory.upsert(record);
        }
        directory
    }

    /// Insert or replace a record, keyed by its db id.
    pub fn upsert(&self, record: TenantRecord) {
        lock(&self.records).insert(record.db_id, record);
    }

    /// Create an active tenant.
    pub fn provision(&self, slug: &str, db_id: i64) -> TenantLifecycleEvent {
        let record = fixtures::active(slug, db_id);
        let event = TenantLifecycleEvent::Provisioned {
            slug: record.slug.clone(),
            db_id: record.db_id,
        };
        self.upsert(record);
        event
    }

    /// Change a tenant's status. Returns `None` if the tenant does not exist.
    pub fn set_status(&self, db_id: TenantDbId, to: TenantStatus) -> Option<TenantLifecycleEvent> {
        let mut records = lock(&self.records);
        let record = records.get_mut(&db_id)?;
        let from = record.status;
        record.status = to;
        Some(TenantLifecycleEvent::StatusChanged {
            slug: record.slug.clone(),
            db_id,
            from,
            to,
        })
    }

    /// Give a tenant a new slug. Returns `None` if the tenant does not exist.
    pub fn rename(&self, db_id: TenantDbId, new_slug: &str) -> Option<TenantLifecycleEvent> {
        let new_slug = TenantSlug::parse(new_slug).ok()?;
        let mut records = lock(&self.records);
        let record = records.get_mut(&db_id)?;
        let old_slug = std::mem::replace(&mut record.slug, new_slug.clone());
        Some(TenantLifecycleEvent::Renamed {
            db_id,
            old_slug,
            new_slug,
        })
    }

    /// Remove a tenant entirely. Returns `None` if the tenant does not exist.
    pub fn remove(&self, db_id: TenantDbId) -> Option<TenantLifecycleEvent> {
        let record = lock(&self.records).remove(&db_id)?;
        Some(TenantLifecycleEvent::Deleted {
            slug: record.slug,
            db_id,
        })
    }

    /// Make every lookup fail with `DirectoryError::Unreachable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every lookup by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Number of `find_by_slug` calls so far.
    pub fn slug_lookups(&self) -> usize {
        self.slug_lookups.load(Ordering::SeqCst)
    }

    /// Number of `find_by_db_id` calls so far.
    pub fn id_lookups(&self) -> usize {
        self.id_lookups.load(Ordering::SeqCst)
    }

    /// Total lookups of either kind.
    pub fn total_lookups(&self) -> usize {
        self.slug_lookups() + self.id_lookups()
    }

    async fn before_lookup(&self) -> Result<(), DirectoryError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unreachable {
                reason: "directory offline".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
        self.slug_lookups.fetch_add(1, Ordering::SeqCst);
        self.before_lookup().await?;
        Ok(lock(&self.records)
            .values()
            .find(|record| &record.slug == slug)
            .cloned())
    }

    async fn find_by_db_id(&self, db_id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
        self.id_lookups.fetch_add(1, Ordering::SeqCst);
        self.before_lookup().await?;
        Ok(lock(&self.records).get(&db_id).cloned())
    }
}

// ============================================================================
// MANUAL CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Clock starting at a fixed, arbitrary instant.
    pub fn fixed() -> Self {
        Self::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default())
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        let next = TimeDelta::from_std(by)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        *now = next;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::fixed()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

// ============================================================================
// LOGGING
// ============================================================================

/// Install a test-friendly tracing subscriber, honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for tenant identifiers and records.

    use super::*;
    use proptest::prelude::*;
    use tenancy_core::is_reserved_slug;

    /// Generate a syntactically valid, non-reserved slug.
    pub fn arb_slug() -> impl Strategy<Value = TenantSlug> {
        "[a-z0-9]([a-z0-9-]{0,20}[a-z0-9])?"
            .prop_filter("reserved", |s| !is_reserved_slug(s))
            .prop_filter_map("invalid slug", |s| TenantSlug::parse(&s).ok())
    }

    /// Generate a string that is never a valid slug.
    pub fn arb_invalid_slug() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "-[a-z0-9]{1,10}",
            "[a-z0-9]{1,10}-",
            "[a-z0-9]{0,5}[A-Z_./ ][a-z0-9]{0,5}",
            "[a-z]{64,80}",
            proptest::sample::select(tenancy_core::RESERVED_SLUGS).prop_map(str::to_string),
        ]
    }

    /// Generate a valid database id.
    pub fn arb_db_id() -> impl Strategy<Value = TenantDbId> {
        (1i64..=i64::MAX).prop_filter_map("invalid id", |v| TenantDbId::new(v).ok())
    }

    pub fn arb_status() -> impl Strategy<Value = TenantStatus> {
        prop_oneof![
            Just(TenantStatus::Active),
            Just(TenantStatus::Suspended),
            Just(TenantStatus::Deleted),
        ]
    }

    pub fn arb_record() -> impl Strategy<Value = TenantRecord> {
        (arb_slug(), arb_db_id(), arb_status())
            .prop_map(|(slug, db_id, status)| TenantRecord::new(slug, db_id, status))
    }

    /// Generate records with distinct slugs and distinct ids.
    pub fn arb_directory_contents(max: usize) -> impl Strategy<Value = Vec<TenantRecord>> {
        proptest::collection::vec(arb_record(), 0..=max).prop_map(|records| {
            let mut seen_slugs = std::collections::HashSet::new();
            let mut seen_ids = std::collections::HashSet::new();
            records
                .into_iter()
                .filter(|r| seen_slugs.insert(r.slug.clone()) && seen_ids.insert(r.db_id))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built records and configurations.
    //!
    //! These panic on invalid input; they are for literals in tests.

    use super::*;

    pub fn slug(s: &str) -> TenantSlug {
        TenantSlug::parse(s).unwrap_or_else(|e| panic!("fixture slug {:?}: {}", s, e))
    }

    pub fn db_id(v: i64) -> TenantDbId {
        TenantDbId::new(v).unwrap_or_else(|e| panic!("fixture id {}: {}", v, e))
    }

    pub fn record(s: &str, id: i64, status: TenantStatus) -> TenantRecord {
        TenantRecord::new(slug(s), db_id(id), status)
    }

    pub fn active(s: &str, id: i64) -> TenantRecord {
        record(s, id, TenantStatus::Active)
    }

    pub fn suspended(s: &str, id: i64) -> TenantRecord {
        record(s, id, TenantStatus::Suspended)
    }

    /// Config with round-number TTLs: one hour positive, one minute negative.
    pub fn test_config() -> ResolverConfig {
        ResolverConfig::new()
            .with_positive_ttl(Duration::from_secs(3600))
            .with_negative_ttl(Duration::from_secs(60))
            .with_directory_timeout(Duration::from_millis(200))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over resolution outcomes.

    use super::*;

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &Result<T, ResolutionError>) {
        match result {
            Err(ResolutionError::NotFound) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_unavailable<T: std::fmt::Debug>(result: &Result<T, ResolutionError>) {
        match result {
            Err(ResolutionError::DirectoryUnavailable { .. }) => {}
            other => panic!("Expected DirectoryUnavailable, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_identifier<T: std::fmt::Debug>(result: &Result<T, ResolutionError>) {
        match result {
            Err(ResolutionError::InvalidIdentifier(_)) => {}
            other => panic!("Expected InvalidIdentifier, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_directory_counts_and_outage() {
        let directory = InMemoryTenantDirectory::with_records([fixtures::active("nrna", 42)]);

        let found = directory.find_by_slug(&fixtures::slug("nrna")).await.unwrap();
        assert_eq!(found.map(|r| r.db_id), Some(fixtures::db_id(42)));
        assert_eq!(directory.slug_lookups(), 1);

        directory.set_unavailable(true);
        assert!(directory.find_by_db_id(fixtures::db_id(42)).await.is_err());
        assert_eq!(directory.id_lookups(), 1);
        assert_eq!(directory.total_lookups(), 2);
    }

    #[tokio::test]
    async fn test_directory_mutators_emit_events() {
        let directory = InMemoryTenantDirectory::new();
        let id = fixtures::db_id(7);

        assert!(matches!(
            directory.provision("acme", 7),
            TenantLifecycleEvent::Provisioned { .. }
        ));
        assert!(matches!(
            directory.rename(id, "acme-co"),
            Some(TenantLifecycleEvent::Renamed { .. })
        ));
        assert!(directory.find_by_slug(&fixtures::slug("acme")).await.unwrap().is_none());
        assert!(directory.set_status(id, TenantStatus::Suspended).is_some());
        assert!(directory.remove(id).is_some());
        assert!(directory.remove(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_latency() {
        let directory = InMemoryTenantDirectory::new();
        directory.set_latency(Some(Duration::from_secs(5)));

        let slow_slug = fixtures::slug("slow");
        let lookup = directory.find_by_slug(&slow_slug);
        let result = tokio::time::timeout(Duration::from_secs(1), lookup).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::fixed();
        let start = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - start, TimeDelta::seconds(90));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_slugs_parse(slug in generators::arb_slug()) {
            prop_assert_eq!(TenantSlug::parse(slug.as_str()).ok(), Some(slug));
        }

        #[test]
        fn prop_invalid_slugs_rejected(raw in generators::arb_invalid_slug()) {
            prop_assert!(TenantSlug::parse(&raw).is_err());
        }

        #[test]
        fn prop_directory_contents_unique(records in generators::arb_directory_contents(16)) {
            let slugs: std::collections::HashSet<_> = records.iter().map(|r| r.slug.clone()).collect();
            prop_assert_eq!(slugs.len(), records.len());
        }
    }
}
