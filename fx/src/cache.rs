//! Rate caching with TTL support.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FxError, FxResult};

/// Key-value cache backend for rates.
///
/// Values are stored as text, the way an external cache server would hold
/// them. Implementations only need atomic single-key get and set.
#[async_trait]
pub trait RateCache: Send + Sync {
    /// Get a live value, or `None` when absent or expired.
    async fn get(&self, key: &str) -> FxResult<Option<String>>;

    /// Store a value that expires after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> FxResult<()>;
}

/// Cache backend whose expired entries can be dropped in bulk.
#[async_trait]
pub trait CacheSweep: Send + Sync {
    /// Drop expired entries and return how many were removed.
    async fn sweep(&self) -> FxResult<usize>;
}

/// Cached entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(value: String, ttl: Duration) -> FxResult<Self> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| FxError::Cache(format!("ttl {ttl:?} is out of range")))?;
        Ok(Self { value, expires_at })
    }

    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Entry count above which expired entries are swept on insert.
const SWEEP_THRESHOLD: usize = 10_000;

/// Thread-safe in-process cache with per-key TTL.
#[derive(Default)]
pub struct MemoryRateCache {
    cache: DashMap<String, CacheEntry>,
}

impl MemoryRateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Get the number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        self.cache.retain(|_, entry| entry.is_valid());
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.cache.len();
        let valid = self.cache.iter().filter(|e| e.is_valid()).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

#[async_trait]
impl RateCache for MemoryRateCache {
    async fn get(&self, key: &str) -> FxResult<Option<String>> {
        if let Some(entry) = self.cache.get(key) {
            if entry.is_valid() {
                return Ok(Some(entry.value.clone()));
            }
            debug!(key, "Cache entry expired");
            drop(entry);
            self.cache.remove_if(key, |_, e| !e.is_valid());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> FxResult<()> {
        let entry = CacheEntry::new(value, ttl)?;
        if self.cache.len() >= SWEEP_THRESHOLD {
            self.evict_expired();
        }

        self.cache.insert(key.to_string(), entry);
        Ok(())
    }
}

#[async_trait]
impl CacheSweep for MemoryRateCache {
    async fn sweep(&self) -> FxResult<usize> {
        let before = self.cache.len();
        self.evict_expired();
        Ok(before.saturating_sub(self.cache.len()))
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_set_and_get() {
        let cache = MemoryRateCache::new();

        cache
            .set("EUR", "1.11".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("EUR").await.unwrap().as_deref(), Some("1.11"));
    }

    #[tokio::test]
    async fn test_cache_miss() {
        let cache = MemoryRateCache::new();

        let cached = tokio_test::assert_ok!(cache.get("EUR").await);
        assert!(cached.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_expiry() {
        let cache = MemoryRateCache::new();
        cache
            .set("EUR", "1.11".to_string(), Duration::from_millis(50))
            .await
            .unwrap();

        assert!(cache.get("EUR").await.unwrap().is_some());

        tokio::time::advance(Duration::from_millis(60)).await;

        assert!(cache.get("EUR").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired_and_stats() {
        let cache = MemoryRateCache::new();
        cache
            .set("EUR", "1.11".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        cache
            .set("CNY", "0.14".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.expired_entries, 1);

        cache.evict_expired();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_counts_evicted() {
        let cache = MemoryRateCache::new();
        cache
            .set("EUR", "1.11".to_string(), Duration::from_millis(10))
            .await
            .unwrap();
        cache
            .set("CNY", "0.14".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;

        assert_eq!(cache.sweep().await.unwrap(), 1);
        assert_eq!(cache.sweep().await.unwrap(), 0);
        assert_eq!(cache.get("CNY").await.unwrap().as_deref(), Some("0.14"));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected() {
        let cache = MemoryRateCache::new();

        let result = cache
            .set("EUR", "1.11".to_string(), Duration::from_secs(u64::MAX))
            .await;

        assert!(matches!(result, Err(FxError::Cache(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_cache_clear() {
        let cache = MemoryRateCache::new();
        cache
            .set("EUR", "1.11".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("RUB", "0.011".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.len(), 2);

        cache.clear();

        assert_eq!(cache.len(), 0);
    }
}
