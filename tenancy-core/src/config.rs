//! Resolver configuration
//!
//! TTLs are explicit configuration handed to the resolver at construction.
//! Values can be loaded from environment variables with defaults suited to
//! development.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default lifetime of a positive (slug <-> id) cache entry.
pub const DEFAULT_POSITIVE_TTL: Duration = Duration::from_secs(3600);

/// Default lifetime of a negative ("does not resolve") cache entry.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60);

/// Default bound on a single directory query.
pub const DEFAULT_DIRECTORY_TIMEOUT: Duration = Duration::from_secs(2);

/// Default capacity of the in-memory cache backend.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Configuration for `TenantIdentifierResolver`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Lifetime of positive entries. Long: active mappings rarely change.
    pub positive_ttl: Duration,
    /// Lifetime of negative entries. Short: bounds how long a just-provisioned
    /// tenant can appear unresolvable.
    pub negative_ttl: Duration,
    /// Upper bound on a single directory query.
    pub directory_timeout: Duration,
    /// Capacity hint for bounded cache backends.
    pub max_entries: usize,
    /// Collapse concurrent misses on the same key into one directory query.
    pub coalesce_misses: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            positive_ttl: DEFAULT_POSITIVE_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            directory_timeout: DEFAULT_DIRECTORY_TIMEOUT,
            max_entries: DEFAULT_MAX_ENTRIES,
            coalesce_misses: false,
        }
    }
}

impl ResolverConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the positive entry TTL.
    pub fn with_positive_ttl(mut self, ttl: Duration) -> Self {
        self.positive_ttl = ttl;
        self
    }

    /// Set the negative entry TTL.
    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    /// Set the directory query timeout.
    pub fn with_directory_timeout(mut self, timeout: Duration) -> Self {
        self.directory_timeout = timeout;
        self
    }

    /// Set the cache capacity hint.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Enable or disable miss coalescing.
    pub fn with_coalescing(mut self, enabled: bool) -> Self {
        self.coalesce_misses = enabled;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TENANCY_POSITIVE_TTL_SECS`: positive entry TTL (default: 3600)
    /// - `TENANCY_NEGATIVE_TTL_SECS`: negative entry TTL (default: 60)
    /// - `TENANCY_DIRECTORY_TIMEOUT_MS`: directory query timeout (default: 2000)
    /// - `TENANCY_CACHE_MAX_ENTRIES`: in-memory cache capacity (default: 10000)
    /// - `TENANCY_COALESCE_MISSES`: "true"/"false" or "1"/"0" (default: false)
    ///
    /// Unparseable values are reported rather than silently replaced.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let positive_ttl = parse_var(&lookup, "TENANCY_POSITIVE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.positive_ttl);

        let negative_ttl = parse_var(&lookup, "TENANCY_NEGATIVE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.negative_ttl);

        let directory_timeout = parse_var(&lookup, "TENANCY_DIRECTORY_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.directory_timeout);

        let max_entries = parse_var(&lookup, "TENANCY_CACHE_MAX_ENTRIES")?
            .unwrap_or(defaults.max_entries);

        let coalesce_misses = parse_flag(&lookup, "TENANCY_COALESCE_MISSES")?
            .unwrap_or(defaults.coalesce_misses);

        let config = Self {
            positive_ttl,
            negative_ttl,
            directory_timeout,
            max_entries,
            coalesce_misses,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for unusable values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.positive_ttl.is_zero() {
            return Err(invalid("positive_ttl", &self.positive_ttl, "must be greater than 0"));
        }
        if self.negative_ttl.is_zero() {
            return Err(invalid("negative_ttl", &self.negative_ttl, "must be greater than 0"));
        }
        if self.directory_timeout.is_zero() {
            return Err(invalid(
                "directory_timeout",
                &self.directory_timeout,
                "must be greater than 0",
            ));
        }
        if self.max_entries == 0 {
            return Err(invalid("max_entries", &self.max_entries, "must be greater than 0"));
        }
        if self.negative_ttl > self.positive_ttl {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("negative_ttl={:?}", self.negative_ttl),
                option_b: format!("positive_ttl={:?}", self.positive_ttl),
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::InvalidValue {
            field: key.to_string(),
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(Some(true)),
            "false" | "0" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "expected true, false, 1 or 0".to_string(),
            }),
        },
    }
}

fn invalid(field: &str, value: &dyn std::fmt::Debug, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{:?}", value),
        reason: reason.to_string(),
    }
}
