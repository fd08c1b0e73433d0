//! Property tests for resolution over arbitrary directory contents.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use tenancy_core::TenantSlug;
use tenancy_storage::{CacheBackend, InMemoryCacheBackend, ResolverKey, TenantIdentifierResolver};
use tenancy_test_utils::fixtures::test_config;
use tenancy_test_utils::generators::{arb_directory_contents, arb_invalid_slug, arb_slug};
use tenancy_test_utils::{InMemoryTenantDirectory, ManualClock, ResolutionError, TenantRecord};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn resolver_over(
    records: Vec<TenantRecord>,
) -> (
    Arc<InMemoryTenantDirectory>,
    Arc<InMemoryCacheBackend>,
    Arc<ManualClock>,
    TenantIdentifierResolver<InMemoryTenantDirectory, InMemoryCacheBackend>,
) {
    let directory = Arc::new(InMemoryTenantDirectory::with_records(records));
    let cache = Arc::new(InMemoryCacheBackend::new());
    let clock = Arc::new(ManualClock::fixed());
    let resolver = TenantIdentifierResolver::new(Arc::clone(&directory), Arc::clone(&cache), test_config())
        .unwrap()
        .with_clock(clock.clone());
    (directory, cache, clock, resolver)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Active records resolve both ways; inactive ones are NotFound both ways.
    #[test]
    fn prop_round_trip_matches_directory(records in arb_directory_contents(12)) {
        runtime().block_on(async {
            let (_directory, _cache, _clock, resolver) = resolver_over(records.clone());

            for record in &records {
                let by_slug = resolver.resolve_db_id(&record.slug).await;
                let by_id = resolver.resolve_slug(record.db_id).await;
                if record.is_active() {
                    prop_assert_eq!(by_slug, Ok(record.db_id));
                    prop_assert_eq!(by_id, Ok(record.slug.clone()));
                } else {
                    prop_assert_eq!(by_slug, Err(ResolutionError::NotFound));
                    prop_assert_eq!(by_id, Err(ResolutionError::NotFound));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Repeat lookups inside the negative TTL never reach the directory.
    #[test]
    fn prop_negative_results_are_cached(slug in arb_slug(), repeats in 1usize..5, wait_secs in 0u64..60) {
        runtime().block_on(async {
            let (directory, _cache, clock, resolver) = resolver_over(Vec::new());

            prop_assert_eq!(resolver.resolve_db_id(&slug).await, Err(ResolutionError::NotFound));
            clock.advance(Duration::from_secs(wait_secs));
            for _ in 0..repeats {
                prop_assert_eq!(resolver.resolve_db_id(&slug).await, Err(ResolutionError::NotFound));
            }
            prop_assert_eq!(directory.slug_lookups(), 1);
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// A key holds at most one entry whatever the sequence of provisioning and expiry.
    #[test]
    fn prop_single_entry_per_key(slug in arb_slug(), steps in proptest::collection::vec(any::<bool>(), 1..8)) {
        runtime().block_on(async {
            let (directory, cache, clock, resolver) = resolver_over(Vec::new());
            let key = ResolverKey::slug(&slug);

            for (i, provision) in steps.into_iter().enumerate() {
                if provision {
                    let event = directory.provision(slug.as_str(), 1);
                    resolver.on_lifecycle_event(&event).await.unwrap();
                } else {
                    clock.advance(Duration::from_secs(61));
                }
                let result = resolver.resolve_db_id(&slug).await;
                let entry = cache.get(&key).await.unwrap();
                prop_assert!(entry.is_some(), "step {} left no entry", i);
                prop_assert_eq!(entry.map(|e| e.is_negative()), Some(result.is_err()));
                prop_assert!(cache.len().await <= 1);
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Malformed or reserved input is rejected without touching the directory.
    #[test]
    fn prop_invalid_input_never_queries(raw in arb_invalid_slug()) {
        runtime().block_on(async {
            let (directory, cache, _clock, resolver) = resolver_over(Vec::new());

            let result = resolver.resolve_raw_slug(&raw).await;
            prop_assert!(matches!(result, Err(ResolutionError::InvalidIdentifier(_))));
            prop_assert!(TenantSlug::parse(&raw).is_err());
            prop_assert_eq!(directory.total_lookups(), 0);
            prop_assert!(cache.is_empty().await);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
