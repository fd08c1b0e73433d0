//! Tenancy Core - Identifier Types and Collaborator Contracts
//!
//! Value objects for tenant slugs and database ids, the tenant directory
//! contract, resolver configuration and the error taxonomy. The cache and
//! resolver live in `tenancy-storage`.

pub mod clock;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod record;

pub use clock::{Clock, SystemClock};
pub use config::{
    ResolverConfig, DEFAULT_DIRECTORY_TIMEOUT, DEFAULT_MAX_ENTRIES, DEFAULT_NEGATIVE_TTL,
    DEFAULT_POSITIVE_TTL,
};
pub use directory::TenantDirectory;
pub use error::{
    CacheError, ConfigError, DirectoryError, IdentifierError, ResolutionError, TenancyError,
    TenancyResult,
};
pub use identity::{is_reserved_slug, TenantDbId, TenantSlug, MAX_SLUG_LEN, RESERVED_SLUGS};
pub use record::{
    TenantIdentity, TenantLifecycleEvent, TenantRecord, TenantStatus, UnknownTenantStatus,
};
