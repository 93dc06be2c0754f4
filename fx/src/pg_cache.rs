//! Rate cache shared through a PostgreSQL table.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::cache::{CacheSweep, RateCache};
use crate::error::{FxError, FxResult};

/// Rate cache every node sees, kept in an unlogged `rate_cache` table.
///
/// Expiry is evaluated by the database clock, so nodes with skewed clocks
/// still agree on which entries are live.
#[derive(Debug, Clone)]
pub struct PgRateCache {
    pool: PgPool,
}

impl PgRateCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a dedicated pool against `url`.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> FxResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(cache_error)?;
        info!(max_connections, "Rate cache pool opened");
        Ok(Self::new(pool))
    }

    /// Create the cache table if it does not exist yet.
    pub async fn ensure_table(&self) -> FxResult<()> {
        sqlx::query(
            "CREATE UNLOGGED TABLE IF NOT EXISTS rate_cache (\
                 key TEXT PRIMARY KEY, \
                 value TEXT NOT NULL, \
                 expires_at TIMESTAMPTZ NOT NULL)",
        )
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }
}

fn cache_error(e: sqlx::Error) -> FxError {
    FxError::Cache(e.to_string())
}

fn ttl_millis(ttl: Duration) -> FxResult<i64> {
    i64::try_from(ttl.as_millis())
        .map_err(|_| FxError::Cache(format!("ttl {ttl:?} is out of range")))
}

#[async_trait]
impl RateCache for PgRateCache {
    async fn get(&self, key: &str) -> FxResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM rate_cache WHERE key = $1 AND expires_at > now()")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(cache_error)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> FxResult<()> {
        let ttl_ms = ttl_millis(ttl)?;
        sqlx::query(
            "INSERT INTO rate_cache (key, value, expires_at) \
             VALUES ($1, $2, now() + $3::float8 * interval '1 millisecond') \
             ON CONFLICT (key) DO UPDATE \
             SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at",
        )
        .bind(key)
        .bind(value)
        .bind(ttl_ms)
        .execute(&self.pool)
        .await
        .map_err(cache_error)?;
        Ok(())
    }
}

#[async_trait]
impl CacheSweep for PgRateCache {
    async fn sweep(&self) -> FxResult<usize> {
        let result = sqlx::query("DELETE FROM rate_cache WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(cache_error)?;
        let evicted = usize::try_from(result.rows_affected()).unwrap_or(usize::MAX);
        debug!(evicted, "Shared rate cache swept");
        Ok(evicted)
    }
}
