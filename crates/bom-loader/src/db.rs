//! Database connection settings and pool creation

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use bom_common::{BomError, Result};

/// Default maximum connections. One carries the load transaction, one is kept
/// free for detached ledger writes and maintenance.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Smallest pool the pipeline can run with
pub const MIN_POOL_SIZE: u32 = 2;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Read settings from the environment.
    ///
    /// - `BOM_DB_STR`, falling back to `DATABASE_URL`
    /// - `DB_MAX_CONNECTIONS`
    /// - `DB_CONNECT_TIMEOUT`
    pub fn from_env() -> Self {
        let url = std::env::var("BOM_DB_STR")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .unwrap_or_default();

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let connect_timeout_secs = std::env::var("DB_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Self {
            url,
            max_connections,
            connect_timeout_secs,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(BomError::config(
                "Database connection string is required (--db, BOM_DB_STR or DATABASE_URL)",
            ));
        }

        if self.max_connections < MIN_POOL_SIZE {
            return Err(BomError::config(format!(
                "Database max_connections must be at least {} (got {})",
                MIN_POOL_SIZE, self.max_connections
            )));
        }

        Ok(())
    }
}

pub async fn create_pool(config: &DbConfig) -> std::result::Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        "Database connection pool created"
    );

    Ok(pool)
}
