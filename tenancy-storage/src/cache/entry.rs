//! Cache entries: positive or negative, with an expiry.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tenancy_core::TenantIdentity;

use super::key::ResolverKey;

/// What a cache entry records about its key.
///
/// A key maps to exactly one outcome at a time, so a key can never be both
/// positive and negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedOutcome {
    /// The key resolved to an active tenant.
    Resolved { identity: TenantIdentity },
    /// The key did not resolve (missing or inactive tenant).
    Absent,
}

/// A cached resolution with its expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub outcome: CachedOutcome,
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Positive entry for an active tenant.
    pub fn positive(identity: TenantIdentity, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::with_ttl(CachedOutcome::Resolved { identity }, now, ttl)
    }

    /// Negative entry for a key that did not resolve.
    pub fn negative(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self::with_ttl(CachedOutcome::Absent, now, ttl)
    }

    fn with_ttl(outcome: CachedOutcome, now: DateTime<Utc>, ttl: Duration) -> Self {
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            outcome,
            cached_at: now,
            expires_at,
        }
    }

    /// True while `now` is strictly before the expiry.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_negative(&self) -> bool {
        matches!(self.outcome, CachedOutcome::Absent)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Checks that a positive entry actually belongs to `key`.
    ///
    /// Negative entries carry no identity and always match.
    pub fn matches_key(&self, key: &ResolverKey) -> bool {
        match (&self.outcome, key) {
            (CachedOutcome::Absent, _) => true,
            (CachedOutcome::Resolved { identity }, ResolverKey::Slug(slug)) => &identity.slug == slug,
            (CachedOutcome::Resolved { identity }, ResolverKey::DbId(id)) => identity.db_id == *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenancy_core::{TenantDbId, TenantSlug};

    fn identity(slug: &str, id: i64) -> TenantIdentity {
        TenantIdentity::new(TenantSlug::parse(slug).unwrap(), TenantDbId::new(id).unwrap())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_positive_entry_expiry() {
        let entry = CacheEntry::positive(identity("nrna", 42), at(1000), Duration::from_secs(300));

        assert_eq!(entry.cached_at, at(1000));
        assert_eq!(entry.expires_at, at(1300));
        assert!(!entry.is_negative());
        assert!(entry.is_live(at(1299)));
        assert!(!entry.is_live(at(1300)));
        assert!(!entry.is_live(at(1301)));
    }

    #[test]
    fn test_negative_entry_expiry() {
        let entry = CacheEntry::negative(at(1000), Duration::from_secs(30));
        assert!(entry.is_negative());
        assert!(entry.is_live(at(1029)));
        assert!(!entry.is_live(at(1030)));
    }

    #[test]
    fn test_remaining() {
        let entry = CacheEntry::negative(at(1000), Duration::from_secs(30));
        assert_eq!(entry.remaining(at(1010)), Duration::from_secs(20));
        assert_eq!(entry.remaining(at(2000)), Duration::ZERO);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let entry = CacheEntry::negative(at(1000), Duration::MAX);
        assert_eq!(entry.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(entry.is_live(at(i32::MAX as i64)));
    }

    #[test]
    fn test_matches_key() {
        let entry = CacheEntry::positive(identity("nrna", 42), at(0), Duration::from_secs(1));

        assert!(entry.matches_key(&ResolverKey::Slug(TenantSlug::parse("nrna").unwrap())));
        assert!(entry.matches_key(&ResolverKey::DbId(TenantDbId::new(42).unwrap())));
        assert!(!entry.matches_key(&ResolverKey::Slug(TenantSlug::parse("acme").unwrap())));
        assert!(!entry.matches_key(&ResolverKey::DbId(TenantDbId::new(5).unwrap())));

        let negative = CacheEntry::negative(at(0), Duration::from_secs(1));
        assert!(negative.matches_key(&ResolverKey::DbId(TenantDbId::new(5).unwrap())));
    }

    #[test]
    fn test_entry_serialization() {
        let entry = CacheEntry::positive(identity("nrna", 42), at(1000), Duration::from_secs(60));
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"kind\":\"resolved\""));
        assert!(json.contains("\"slug\":\"nrna\""));

        let decoded: CacheEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, entry);
    }
}
