//! SQLite store shared with the serial logger.
//!
//! The logger and this engine are separate processes writing the same file. Concurrency relies on
//! WAL mode (many readers, one writer) plus short bounded retries when SQLite reports the database
//! as busy or locked. No application-level locking exists between the two processes.

pub mod retry;
pub mod schema;

use anyhow::{Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::StoreConfig;

pub use retry::{is_transient, with_busy_retry, RetryPolicy};

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub connect_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/solar_tracker.db"),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
            connect_attempts: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl From<&StoreConfig> for DatabaseConfig {
    fn from(cfg: &StoreConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            max_connections: cfg.max_connections,
            busy_timeout: Duration::from_millis(cfg.busy_timeout_ms),
            connect_attempts: cfg.connect_attempts,
            retry: RetryPolicy {
                max_retries: cfg.busy_retries,
                initial_backoff: Duration::from_millis(cfg.busy_backoff_ms),
            },
        }
    }
}

/// Connection pool plus the busy-retry policy every repository applies.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl Database {
    /// Open (creating if needed) the store file, apply pragmas and ensure the schema exists.
    pub async fn open(config: &DatabaseConfig) -> Result<Self> {
        info!(path = %config.path.display(), "opening store");

        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let pool = Self::connect_with_retry(config).await?;
        let db = Self {
            pool,
            retry: config.retry.clone(),
        };
        db.health_check().await?;
        schema::ensure_schema(&db.pool).await?;

        info!("store ready");
        Ok(db)
    }

    /// Private in-memory store on a single long-lived connection.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("failed to open in-memory store")?;
        schema::ensure_schema(&pool).await?;
        Ok(Self {
            pool,
            retry: RetryPolicy::default(),
        })
    }

    /// Connect with exponential backoff retry logic
    async fn connect_with_retry(config: &DatabaseConfig) -> Result<SqlitePool> {
        let mut attempt = 0;
        let mut delay = Duration::from_millis(500);

        loop {
            attempt += 1;
            match Self::try_connect(config).await {
                Ok(pool) => return Ok(pool),
                Err(e) if attempt >= config.connect_attempts => {
                    return Err(e).context(format!(
                        "failed to open store after {} attempts",
                        config.connect_attempts
                    ));
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = config.connect_attempts,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "store connection attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    async fn try_connect(config: &DatabaseConfig) -> Result<SqlitePool> {
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout)
            .pragma("cache_size", "-8000")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout + Duration::from_secs(1))
            .connect_with(options)
            .await
            .context("failed to create store pool")?;

        Ok(pool)
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("store health check failed")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Gracefully close the pool; outstanding transactions finish first.
    pub async fn close(&self) {
        info!("closing store");
        self.pool.close().await;
    }
}
