//! Cache layer for resolver outcomes.
//!
//! Every cache key is a [`ResolverKey`]: either a slug or a database id.
//! Each key holds exactly one [`CacheEntry`], positive (the tenant's
//! identity) or negative (the key did not resolve), each with its own expiry.
//!
//! Backends only store and return entries. Whether an entry is still live is
//! decided by the resolver against its clock, so a backend shared by several
//! processes needs no clock of its own.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(InMemoryCacheBackend::with_capacity(10_000));
//! // or, shared across workers on one host:
//! let cache = Arc::new(LmdbCacheBackend::new("/var/cache/tenancy", 64)?);
//! ```

pub mod entry;
pub mod key;
pub mod lmdb_backend;
pub mod memory;
pub mod traits;

pub use entry::{CacheEntry, CachedOutcome};
pub use key::{ResolverKey, DB_ID_PREFIX, SLUG_PREFIX};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::InMemoryCacheBackend;
pub use traits::{CacheBackend, CacheStats};
