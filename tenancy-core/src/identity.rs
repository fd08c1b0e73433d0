//! Identity types for tenants
//!
//! `TenantSlug` is the public, URL-facing identifier. `TenantDbId` is the
//! internal id that selects a tenant's data partition. Both validate on
//! construction and are immutable afterwards.

use crate::error::IdentifierError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::num::NonZeroU64;
use std::str::FromStr;

/// Maximum slug length (one DNS label).
pub const MAX_SLUG_LEN: usize = 63;

/// Slugs that collide with platform routes or infrastructure hostnames.
///
/// Kept sorted so lookups can binary search.
pub const RESERVED_SLUGS: &[&str] = &[
    "admin",
    "api",
    "app",
    "assets",
    "auth",
    "cdn",
    "dashboard",
    "dev",
    "docs",
    "ftp",
    "help",
    "localhost",
    "login",
    "mail",
    "register",
    "root",
    "static",
    "status",
    "support",
    "system",
    "tenant",
    "tenants",
    "www",
];

/// Returns true if `candidate` is on the reserved list.
pub fn is_reserved_slug(candidate: &str) -> bool {
    RESERVED_SLUGS.binary_search(&candidate).is_ok()
}

// ============================================================================
// TENANT SLUG
// ============================================================================

/// A validated public tenant identifier, e.g. `nrna`.
///
/// Invariants: 1..=63 characters from `[a-z0-9-]`, no leading or trailing
/// hyphen, not reserved. Parsing is strict: uppercase input is rejected,
/// not folded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantSlug(String);

impl TenantSlug {
    /// Validate and wrap a raw slug.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        validate_slug(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Extract the tenant slug from the first DNS label of a host.
    ///
    /// Ports are ignored and the label is lowercased (hostnames are
    /// case-insensitive). IP literals and single-label hosts have no
    /// tenant label.
    ///
    /// ```
    /// use tenancy_core::TenantSlug;
    /// let slug = TenantSlug::from_host("nrna.example.com:8080").unwrap();
    /// assert_eq!(slug.as_str(), "nrna");
    /// assert!(TenantSlug::from_host("192.168.1.1").is_err());
    /// ```
    pub fn from_host(host: &str) -> Result<Self, IdentifierError> {
        let no_tenant = || IdentifierError::NoTenantInHost {
            host: host.to_string(),
        };

        // Bracketed or bare IPv6 literal.
        if host.starts_with('[') || host.matches(':').count() > 1 {
            return Err(no_tenant());
        }

        let hostname = host.split(':').next().unwrap_or(host);
        if hostname.parse::<IpAddr>().is_ok() {
            return Err(no_tenant());
        }
        // No real top-level domain is numeric, so `256.1.1.1` is a bad address, not a tenant.
        let tld = hostname.rsplit('.').next().unwrap_or(hostname);
        if !tld.is_empty() && tld.bytes().all(|b| b.is_ascii_digit()) {
            return Err(no_tenant());
        }

        let mut labels = hostname.split('.');
        let first = labels.next().ok_or_else(no_tenant)?;
        if labels.next().is_none() {
            return Err(no_tenant());
        }

        Self::parse(&first.to_ascii_lowercase())
    }

    /// Borrow the slug as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the slug, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

fn validate_slug(raw: &str) -> Result<(), IdentifierError> {
    if raw.is_empty() {
        return Err(IdentifierError::EmptySlug);
    }

    let len = raw.chars().count();
    if len > MAX_SLUG_LEN {
        return Err(IdentifierError::SlugTooLong {
            len,
            max: MAX_SLUG_LEN,
        });
    }

    if let Some((position, ch)) = raw
        .chars()
        .enumerate()
        .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
    {
        return Err(IdentifierError::InvalidCharacter { ch, position });
    }

    if raw.starts_with('-') || raw.ends_with('-') {
        return Err(IdentifierError::HyphenAtEdge);
    }

    if is_reserved_slug(raw) {
        return Err(IdentifierError::ReservedSlug {
            slug: raw.to_string(),
        });
    }

    Ok(())
}

impl FromStr for TenantSlug {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TenantSlug {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_slug(&value)?;
        Ok(Self(value))
    }
}

impl From<TenantSlug> for String {
    fn from(slug: TenantSlug) -> Self {
        slug.0
    }
}

impl AsRef<str> for TenantSlug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TENANT DATABASE ID
// ============================================================================

/// Internal tenant id used to select the tenant's data partition.
///
/// Always positive and within `i64` range so it round-trips through a
/// Postgres `BIGINT` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct TenantDbId(NonZeroU64);

impl TenantDbId {
    /// Create a database id from a signed integer.
    pub fn new(value: i64) -> Result<Self, IdentifierError> {
        if value <= 0 {
            return Err(IdentifierError::NonPositiveDbId { value });
        }
        NonZeroU64::new(value as u64)
            .map(Self)
            .ok_or(IdentifierError::NonPositiveDbId { value })
    }

    /// The id as an unsigned integer.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// The id as a signed integer (always positive).
    pub fn as_i64(self) -> i64 {
        self.0.get() as i64
    }
}

impl TryFrom<u64> for TenantDbId {
    type Error = IdentifierError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        let signed = i64::try_from(value).map_err(|_| IdentifierError::DbIdOutOfRange { value })?;
        Self::new(signed)
    }
}

impl TryFrom<i64> for TenantDbId {
    type Error = IdentifierError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantDbId> for u64 {
    fn from(id: TenantDbId) -> Self {
        id.get()
    }
}

impl FromStr for TenantDbId {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.parse().map_err(|_| IdentifierError::MalformedDbId {
            raw: s.to_string(),
        })?;
        Self::new(value)
    }
}

impl fmt::Display for TenantDbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Every accepted slug satisfies the charset, edge and length rules.
        #[test]
        fn prop_accepted_slugs_satisfy_invariants(raw in "[a-zA-Z0-9_.-]{0,70}") {
            if let Ok(slug) = TenantSlug::parse(&raw) {
                let s = slug.as_str();
                prop_assert!(!s.is_empty() && s.len() <= MAX_SLUG_LEN);
                prop_assert!(s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
                prop_assert!(!s.starts_with('-') && !s.ends_with('-'));
                prop_assert!(!is_reserved_slug(s));
            }
        }

        /// Well-formed slugs are accepted unless reserved.
        #[test]
        fn prop_well_formed_slugs_accepted(raw in "[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?") {
            let parsed = TenantSlug::parse(&raw);
            if is_reserved_slug(&raw) {
                let is_reserved_err = matches!(parsed, Err(IdentifierError::ReservedSlug { .. }));
                prop_assert!(is_reserved_err);
            } else {
                prop_assert_eq!(parsed.map(TenantSlug::into_inner), Ok(raw));
            }
        }

        /// Database ids accept exactly the positive integers.
        #[test]
        fn prop_db_id_positive(value in any::<i64>()) {
            prop_assert_eq!(TenantDbId::new(value).is_ok(), value > 0);
        }
    }
}
