//! Error types for tenant identifier resolution

use std::time::Duration;
use thiserror::Error;

/// Value-object construction errors for slugs and database ids.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("Tenant slug is empty")]
    EmptySlug,

    #[error("Tenant slug is {len} characters, maximum is {max}")]
    SlugTooLong { len: usize, max: usize },

    #[error("Tenant slug contains invalid character {ch:?} at position {position}")]
    InvalidCharacter { ch: char, position: usize },

    #[error("Tenant slug must start and end with a letter or digit")]
    HyphenAtEdge,

    #[error("Tenant slug is reserved: {slug}")]
    ReservedSlug { slug: String },

    #[error("Tenant database id must be positive, got {value}")]
    NonPositiveDbId { value: i64 },

    #[error("Tenant database id out of range: {value}")]
    DbIdOutOfRange { value: u64 },

    #[error("Tenant database id is not an integer: {raw}")]
    MalformedDbId { raw: String },

    #[error("No tenant label in host: {host}")]
    NoTenantInHost { host: String },
}

/// Failures reported by a tenant directory collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Tenant directory unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Tenant directory query timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Tenant directory query failed: {reason}")]
    Query { reason: String },

    #[error("Tenant directory returned a malformed record: {reason}")]
    MalformedRecord { reason: String },
}

/// Cache backend errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend error: {reason}")]
    Backend { reason: String },

    #[error("Cache serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Cache deserialization error: {reason}")]
    Deserialization { reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Outcome of a failed resolution.
///
/// `NotFound` deliberately covers both "no such tenant" and "tenant exists
/// but is not active". `DirectoryUnavailable` is never folded into it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Tenant not found")]
    NotFound,

    #[error("Tenant directory unavailable: {reason}")]
    DirectoryUnavailable { reason: String },

    #[error("Invalid tenant identifier: {0}")]
    InvalidIdentifier(#[from] IdentifierError),
}

impl ResolutionError {
    /// Returns true for the expected "does not resolve" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Returns true if the directory could not be consulted.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::DirectoryUnavailable { .. })
    }
}

impl From<DirectoryError> for ResolutionError {
    fn from(e: DirectoryError) -> Self {
        Self::DirectoryUnavailable {
            reason: e.to_string(),
        }
    }
}

/// Master error type for all tenancy errors.
#[derive(Debug, Clone, Error)]
pub enum TenancyError {
    #[error("Identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),
}

/// Result type alias for tenancy operations.
pub type TenancyResult<T> = Result<T, TenancyError>;

// =============================================================================
// TESTS
// =============================================================================
