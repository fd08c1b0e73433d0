//! Tenancy Storage - Cache Backends and Identifier Resolution
//!
//! Maps public tenant slugs to internal database ids and back, using a
//! cache-aside strategy in front of the tenant directory:
//!
//! - positive results are cached for a long TTL
//! - "no such active tenant" is cached for a short TTL
//! - directory failures are never cached
//! - lifecycle events invalidate affected entries synchronously

pub mod cache;
pub mod coalesce;
#[cfg(feature = "postgres")]
pub mod pg_directory;
pub mod resolver;

pub use cache::{
    CacheBackend, CacheEntry, CacheStats, CachedOutcome, InMemoryCacheBackend, LmdbCacheBackend,
    LmdbCacheError, ResolverKey,
};
pub use coalesce::{FlightGuard, MissCoalescer};
#[cfg(feature = "postgres")]
pub use pg_directory::{PgDirectoryConfig, PgTenantDirectory, DEFAULT_TENANT_TABLE};
pub use resolver::{ResolverStats, ResolverStatsSnapshot, TenantIdentifierResolver};
