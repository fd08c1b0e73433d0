//! Cache keys for resolver entries.
//!
//! Every cache key is built from an already-validated identifier, so a key
//! can never be constructed from raw user input. Slug keys and id keys live
//! in separate prefixes of the same namespace.

use std::fmt;

use tenancy_core::{TenantDbId, TenantSlug};

/// Prefix for slug -> id entries.
pub const SLUG_PREFIX: &str = "slug:";

/// Prefix for id -> slug entries.
pub const DB_ID_PREFIX: &str = "dbid:";

/// A resolver cache key.
///
/// # String Format
///
/// - `slug:<slug>` for forward lookups (`slug:nrna`)
/// - `dbid:<id>` for reverse lookups (`dbid:42`)
///
/// The slug charset excludes `:`, so the encoding is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResolverKey {
    Slug(TenantSlug),
    DbId(TenantDbId),
}

impl ResolverKey {
    /// Key for a forward (slug -> id) lookup.
    pub fn slug(slug: &TenantSlug) -> Self {
        Self::Slug(slug.clone())
    }

    /// Key for a reverse (id -> slug) lookup.
    pub fn db_id(db_id: TenantDbId) -> Self {
        Self::DbId(db_id)
    }

    /// Encode this key to its string form.
    pub fn encode(&self) -> String {
        match self {
            Self::Slug(slug) => format!("{}{}", SLUG_PREFIX, slug),
            Self::DbId(id) => format!("{}{}", DB_ID_PREFIX, id),
        }
    }

    /// Decode a key from its string form.
    ///
    /// Returns `None` if the prefix is unknown or the identifier part fails
    /// validation.
    pub fn decode(encoded: &str) -> Option<Self> {
        if let Some(raw) = encoded.strip_prefix(SLUG_PREFIX) {
            return TenantSlug::parse(raw).ok().map(Self::Slug);
        }
        if let Some(raw) = encoded.strip_prefix(DB_ID_PREFIX) {
            return raw.parse::<TenantDbId>().ok().map(Self::DbId);
        }
        None
    }

    /// Returns true for slug keys.
    pub fn is_slug(&self) -> bool {
        matches!(self, Self::Slug(_))
    }
}

impl fmt::Display for ResolverKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slug(slug) => write!(f, "{}{}", SLUG_PREFIX, slug),
            Self::DbId(id) => write!(f, "{}{}", DB_ID_PREFIX, id),
        }
    }
}
