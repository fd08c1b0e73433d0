//! PostgreSQL Tenant Directory
//!
//! `TenantDirectory` over a `tenants` table reached through a
//! deadpool-postgres connection pool. The table must expose `slug TEXT`,
//! `db_id BIGINT` and `status TEXT` columns.

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tenancy_core::{
    ConfigError, DirectoryError, TenantDbId, TenantDirectory, TenantRecord, TenantSlug,
    TenantStatus,
};
use tokio_postgres::{NoTls, Row};

/// Default name of the tenant table.
pub const DEFAULT_TENANT_TABLE: &str = "tenants";

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// Connection settings for the tenant directory database.
#[derive(Debug, Clone)]
pub struct PgDirectoryConfig {
    /// PostgreSQL host
    pub host: String,
    /// PostgreSQL port
    pub port: u16,
    /// Database name
    pub dbname: String,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Maximum pool size
    pub max_size: usize,
    /// Table holding tenant records
    pub table: String,
}

impl Default for PgDirectoryConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "tenancy".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 8,
            table: DEFAULT_TENANT_TABLE.to_string(),
        }
    }
}

impl PgDirectoryConfig {
    /// Read `TENANCY_DB_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            host: std::env::var("TENANCY_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("TENANCY_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("TENANCY_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("TENANCY_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("TENANCY_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("TENANCY_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            table: std::env::var("TENANCY_DB_TABLE").unwrap_or(defaults.table),
        };
        config.validate()?;
        Ok(config)
    }

    /// The table name is spliced into SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_plain_identifier(&self.table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: self.table.clone(),
                reason: "must be [a-z_][a-z0-9_]* optionally qualified by one schema".to_string(),
            });
        }
        if self.max_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_size".to_string(),
                value: "0".to_string(),
                reason: "pool needs at least one connection".to_string(),
            });
        }
        Ok(())
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, DirectoryError> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DirectoryError::Unreachable {
                reason: format!("Failed to create pool: {}", e),
            })
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() <= 2
        && parts.iter().all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
                && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        })
}

// ============================================================================
// DIRECTORY
// ============================================================================

/// Tenant directory backed by PostgreSQL.
#[derive(Clone)]
pub struct PgTenantDirectory {
    pool: Pool,
    by_slug_sql: String,
    by_id_sql: String,
}

impl PgTenantDirectory {
    /// Create a directory over an existing pool.
    pub fn new(pool: Pool, table: &str) -> Result<Self, ConfigError> {
        if !is_plain_identifier(table) {
            return Err(ConfigError::InvalidValue {
                field: "table".to_string(),
                value: table.to_string(),
                reason: "not a plain identifier".to_string(),
            });
        }
        Ok(Self {
            pool,
            by_slug_sql: format!("SELECT slug, db_id, status FROM {} WHERE slug = $1", table),
            by_id_sql: format!("SELECT slug, db_id, status FROM {} WHERE db_id = $1", table),
        })
    }

    /// Create a directory and its pool from configuration.
    pub fn from_config(config: &PgDirectoryConfig) -> Result<Self, DirectoryError> {
        config.validate().map_err(|e| DirectoryError::Unreachable {
            reason: e.to_string(),
        })?;
        let pool = config.create_pool()?;
        Self::new(pool, &config.table).map_err(|e| DirectoryError::Unreachable {
            reason: e.to_string(),
        })
    }

    /// Get the current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self) -> Result<deadpool_postgres::Object, DirectoryError> {
        self.pool
            .get()
            .await
            .map_err(|e| DirectoryError::Unreachable {
                reason: e.to_string(),
            })
    }

    async fn fetch_one(
        &self,
        sql: &str,
        param: &(dyn tokio_postgres::types::ToSql + Sync),
    ) -> Result<Option<TenantRecord>, DirectoryError> {
        let conn = self.get_conn().await?;
        let row = conn
            .query_opt(sql, &[param])
            .await
            .map_err(|e| DirectoryError::Query {
                reason: e.to_string(),
            })?;

        row.map(|r| record_from_row(&r)).transpose()
    }
}

fn record_from_row(row: &Row) -> Result<TenantRecord, DirectoryError> {
    let malformed = |reason: String| DirectoryError::MalformedRecord { reason };

    let slug: String = row.try_get(0).map_err(|e| malformed(e.to_string()))?;
    let db_id: i64 = row.try_get(1).map_err(|e| malformed(e.to_string()))?;
    let status: String = row.try_get(2).map_err(|e| malformed(e.to_string()))?;

    let status: TenantStatus = status.parse().map_err(|e| malformed(format!("{}", e)))?;
    TenantRecord::from_raw(&slug, db_id, status).map_err(|e| malformed(e.to_string()))
}

#[async_trait]
impl TenantDirectory for PgTenantDirectory {
    async fn find_by_slug(&self, slug: &TenantSlug) -> Result<Option<TenantRecord>, DirectoryError> {
        let slug = slug.as_str();
        self.fetch_one(&self.by_slug_sql, &slug).await
    }

    async fn find_by_db_id(&self, db_id: TenantDbId) -> Result<Option<TenantRecord>, DirectoryError> {
        let db_id = db_id.as_i64();
        self.fetch_one(&self.by_id_sql, &db_id).await
    }
}
