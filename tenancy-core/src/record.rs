//! Tenant records and lifecycle events
//!
//! `TenantRecord` is owned by the tenant directory; resolution code only
//! reads it. `TenantLifecycleEvent` describes the directory-side changes
//! that must be followed by cache invalidation.

use crate::error::IdentifierError;
use crate::identity::{TenantDbId, TenantSlug};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant status as stored by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    /// Only active tenants resolve.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTenantStatus(pub String);

impl fmt::Display for UnknownTenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown tenant status: {}", self.0)
    }
}

impl std::error::Error for UnknownTenantStatus {}

impl FromStr for TenantStatus {
    type Err = UnknownTenantStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deleted" => Ok(Self::Deleted),
            other => Err(UnknownTenantStatus(other.to_string())),
        }
    }
}

/// The slug/id pair of a resolved tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantIdentity {
    pub slug: TenantSlug,
    pub db_id: TenantDbId,
}

impl TenantIdentity {
    pub fn new(slug: TenantSlug, db_id: TenantDbId) -> Self {
        Self { slug, db_id }
    }
}

/// Authoritative tenant tuple owned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub slug: TenantSlug,
    pub db_id: TenantDbId,
    pub status: TenantStatus,
}

impl TenantRecord {
    pub fn new(slug: TenantSlug, db_id: TenantDbId, status: TenantStatus) -> Self {
        Self {
            slug,
            db_id,
            status,
        }
    }

    /// Build a record from raw column values, validating both identifiers.
    pub fn from_raw(slug: &str, db_id: i64, status: TenantStatus) -> Result<Self, IdentifierError> {
        Ok(Self {
            slug: TenantSlug::parse(slug)?,
            db_id: TenantDbId::new(db_id)?,
            status,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// The identity pair, regardless of status.
    pub fn identity(&self) -> TenantIdentity {
        TenantIdentity::new(self.slug.clone(), self.db_id)
    }
}

/// A directory-side change that invalidates cached resolutions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TenantLifecycleEvent {
    /// A tenant was created. Clears negative entries cached before it existed.
    Provisioned { slug: TenantSlug, db_id: TenantDbId },
    /// Status transition (suspend, reactivate).
    StatusChanged {
        slug: TenantSlug,
        db_id: TenantDbId,
        from: TenantStatus,
        to: TenantStatus,
    },
    /// The public slug changed; the id stays the same.
    Renamed {
        db_id: TenantDbId,
        old_slug: TenantSlug,
        new_slug: TenantSlug,
    },
    /// The tenant was removed.
    Deleted { slug: TenantSlug, db_id: TenantDbId },
}

impl TenantLifecycleEvent {
    /// The `(slug, id)` pairs whose cache entries must be invalidated.
    pub fn invalidation_targets(&self) -> Vec<(TenantSlug, Option<TenantDbId>)> {
        match self {
            Self::Provisioned { slug, db_id }
            | Self::StatusChanged { slug, db_id, .. }
            | Self::Deleted { slug, db_id } => vec![(slug.clone(), Some(*db_id))],
            Self::Renamed {
                db_id,
                old_slug,
                new_slug,
            } => vec![(old_slug.clone(), Some(*db_id)), (new_slug.clone(), None)],
        }
    }
}
