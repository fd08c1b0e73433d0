//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep resolver entries in a
//! memory-mapped store that survives process restarts and can be shared by
//! several worker processes on one host.
//!
//! # Layout
//!
//! - Key: the UTF-8 encoding of `ResolverKey` (`slug:nrna`, `dbid:42`)
//! - Value: the JSON encoding of `CacheEntry`
//!
//! One LMDB key holds one entry, so a positive write replaces a negative
//! entry for the same key inside a single write transaction.
//!
//! # Capacity
//!
//! The map never grows past `max_size_mb`, so the entry count is bounded too:
//! by default one entry per KiB of map, capped at `DEFAULT_MAX_ENTRIES`. A new
//! key arriving at the bound purges expired entries first and evicts the
//! entries closest to expiry only when nothing had expired. If LMDB still
//! reports the map full, a larger batch is reclaimed and the write is retried
//! once.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, MdbError, RwTxn};
use tenancy_core::{CacheError, DEFAULT_MAX_ENTRIES};

use super::entry::CacheEntry;
use super::key::ResolverKey;
use super::traits::{CacheBackend, CacheStats};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Serialization(reason) => CacheError::Serialization { reason },
            LmdbCacheError::Deserialization(reason) => CacheError::Deserialization { reason },
            other => CacheError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

/// Map space budgeted per entry when deriving the default capacity.
const BYTES_PER_ENTRY: usize = 1024;

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use tenancy_storage::cache::{LmdbCacheBackend, ResolverKey};
///
/// let backend = LmdbCacheBackend::new("/var/cache/tenancy", 64)?;
/// let cache = Arc::new(backend);
/// let resolver = TenantIdentifierResolver::new(directory, cache, ResolverConfig::default())?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Entry count at which new keys start displacing old ones.
    max_entries: u64,
    /// Hit/miss/eviction counters; entry count is read from LMDB.
    stats: RwLock<CacheStats>,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;
        let map_size = max_size_mb.saturating_mul(1024 * 1024);

        // SAFETY: the environment is opened once per path by this backend and
        // the files are not modified by anything but LMDB.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            max_entries: (map_size / BYTES_PER_ENTRY).clamp(1, DEFAULT_MAX_ENTRIES) as u64,
            stats: RwLock::new(CacheStats::default()),
        })
    }

    /// Lower the entry bound (minimum 1). Never raised past what the map
    /// size allows.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = self.max_entries.min(max_entries.max(1) as u64);
        self
    }

    /// Entry count at which new keys start displacing old ones.
    pub fn max_entries(&self) -> u64 {
        self.max_entries
    }

    /// Write one entry, making room first when the key is new and the
    /// database is at its bound. Returns how many entries were evicted.
    fn write_entry(&self, key: &[u8], value: &[u8], now: DateTime<Utc>) -> heed::Result<u64> {
        let mut wtxn = self.env.write_txn()?;

        let mut evicted = 0;
        if self.db.get(&wtxn, key)?.is_none() && self.db.len(&wtxn)? >= self.max_entries {
            evicted = self.make_room(&mut wtxn, now, self.eviction_batch())?;
        }
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;

        Ok(evicted)
    }

    /// Live entries evicted at once when the bound is hit with nothing
    /// expired. Each eviction scans the database, so it frees a sixteenth.
    fn eviction_batch(&self) -> usize {
        (self.max_entries / 16).max(1) as usize
    }

    /// Free map space after LMDB reported it full: purge everything expired,
    /// or if nothing had expired, the eighth of entries closest to expiry.
    fn reclaim(&self, now: DateTime<Utc>) -> Result<u64, LmdbCacheError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let batch = self
            .db
            .len(&wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            / 8;
        let evicted = self
            .make_room(&mut wtxn, now, (batch as usize).max(1))
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        Ok(evicted)
    }

    /// Delete every entry expired at `now`. When none had, delete the `batch`
    /// live entries closest to expiry instead. Entries that no longer decode
    /// count as expired.
    fn make_room(&self, wtxn: &mut RwTxn<'_>, now: DateTime<Utc>, batch: usize) -> heed::Result<u64> {
        let mut expired: Vec<Vec<u8>> = Vec::new();
        let mut live: Vec<(DateTime<Utc>, Vec<u8>)> = Vec::new();

        for item in self.db.iter(wtxn)? {
            let (key, value) = item?;
            match serde_json::from_slice::<CacheEntry>(value) {
                Ok(entry) if entry.is_live(now) => live.push((entry.expires_at, key.to_vec())),
                _ => expired.push(key.to_vec()),
            }
        }

        let victims = if expired.is_empty() {
            live.sort_unstable_by(|a, b| a.0.cmp(&b.0));
            live.into_iter().take(batch).map(|(_, key)| key).collect()
        } else {
            expired
        };

        for key in &victims {
            self.db.delete(wtxn, key)?;
        }
        Ok(victims.len() as u64)
    }

    fn record_evictions(&self, evicted: u64) {
        if evicted == 0 {
            return;
        }
        if let Ok(mut stats) = self.stats.write() {
            stats.evictions += evicted;
        }
    }

    fn record_hit(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.hits += 1;
        }
    }

    fn record_miss(&self) {
        if let Ok(mut stats) = self.stats.write() {
            stats.misses += 1;
        }
    }

    fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &ResolverKey) -> Result<Option<CacheEntry>, CacheError> {
        let encoded_key = key.encode();

        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, encoded_key.as_bytes()) {
            Ok(Some(bytes)) => {
                self.record_hit();
                let entry: CacheEntry = serde_json::from_slice(bytes)
                    .map_err(|e| LmdbCacheError::Deserialization(e.to_string()))?;
                Ok(Some(entry))
            }
            Ok(None) => {
                self.record_miss();
                Ok(None)
            }
            Err(e) => {
                self.record_miss();
                Err(LmdbCacheError::Transaction(e.to_string()).into())
            }
        }
    }

    async fn put(&self, key: &ResolverKey, entry: CacheEntry) -> Result<(), CacheError> {
        let encoded_key = key.encode();
        let value_bytes = serde_json::to_vec(&entry)
            .map_err(|e| LmdbCacheError::Serialization(e.to_string()))?;
        let now = entry.cached_at;

        let evicted = match self.write_entry(encoded_key.as_bytes(), &value_bytes, now) {
            // The failed transaction is already aborted.
            Err(heed::Error::Mdb(MdbError::MapFull)) => {
                self.record_evictions(self.reclaim(now)?);
                self.write_entry(encoded_key.as_bytes(), &value_bytes, now)
                    .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?
            }
            other => other.map_err(|e| LmdbCacheError::Transaction(e.to_string()))?,
        };
        self.record_evictions(evicted);

        Ok(())
    }

    async fn delete(&self, key: &ResolverKey) -> Result<bool, CacheError> {
        let encoded_key = key.encode();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let deleted = self
            .db
            .delete(&mut wtxn, encoded_key.as_bytes())
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(deleted)
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let removed = self.entry_count()?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(removed)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .map_err(|_| CacheError::LockPoisoned)?;
        stats.entry_count = self.entry_count()?;
        Ok(stats)
    }
}
