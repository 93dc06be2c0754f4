//! Node configuration.

use std::collections::BTreeSet;
use std::time::Duration;

use microbank_common::CurrencyCode;

/// Longest accepted rate cache TTL.
pub const MAX_RATE_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Longest accepted wait for a row lock inside a balance transaction.
pub const MAX_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL.
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    /// How long a balance transaction waits for a row lock or a statement.
    pub lock_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/microbank".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Where cached rates live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Private to this process.
    Memory,
    /// A table in the ledger database, shared by every node.
    Postgres,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "postgres" => Ok(CacheBackend::Postgres),
            other => Err(format!("Unknown cache backend {other:?}")),
        }
    }
}

/// Rate cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Lifetime of a cached rate.
    pub key_ttl: Duration,
    /// How often expired entries are swept.
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            key_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

/// External quote API configuration.
#[derive(Debug, Clone)]
pub struct QuoteApiConfig {
    pub url: String,
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for QuoteApiConfig {
    fn default() -> Self {
        Self {
            url: "https://api.currencyapi.com/v3/latest".to_string(),
            api_key: String::new(),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Main node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub quote_api: QuoteApiConfig,
    /// Currency codes as configured; see [`NodeConfig::currencies`].
    pub supported_currencies: Vec<String>,
    /// Capacity of the outgoing notification queue.
    pub notify_queue_capacity: usize,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            cache: CacheConfig::default(),
            quote_api: QuoteApiConfig::default(),
            supported_currencies: vec!["RUB".to_string(), "EUR".to_string(), "CNY".to_string()],
            notify_queue_capacity: 1024,
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup. Unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }

        if let Some(max) = lookup("DATABASE_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.database.max_connections = max;
        }

        if let Some(ms) = lookup("DATABASE_LOCK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.database.lock_timeout = Duration::from_millis(ms);
        }

        if let Some(backend) = lookup("RATE_CACHE_BACKEND").and_then(|v| v.parse().ok()) {
            config.cache.backend = backend;
        }

        if let Some(secs) = lookup("RATE_CACHE_TTL_SECS").and_then(|v| v.parse().ok()) {
            config.cache.key_ttl = Duration::from_secs(secs);
        }

        if let Some(url) = lookup("QUOTE_API_URL") {
            config.quote_api.url = url;
        }

        if let Some(key) = lookup("QUOTE_API_KEY") {
            config.quote_api.api_key = key;
        }

        if let Some(ms) = lookup("QUOTE_API_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.quote_api.timeout = Duration::from_millis(ms);
        }

        if let Some(codes) = lookup("SUPPORTED_CURRENCIES") {
            config.supported_currencies = codes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(capacity) = lookup("NOTIFY_QUEUE_CAPACITY").and_then(|v| v.parse().ok()) {
            config.notify_queue_capacity = capacity;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Parsed set of supported currencies.
    pub fn currencies(&self) -> Result<BTreeSet<CurrencyCode>, String> {
        self.supported_currencies
            .iter()
            .map(|code| {
                CurrencyCode::parse(code).map_err(|e| format!("Invalid currency {code:?}: {e}"))
            })
            .collect()
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }

        if self.database.max_connections == 0 {
            return Err("Database pool needs at least one connection".to_string());
        }

        if self.database.lock_timeout.is_zero() || self.database.lock_timeout > MAX_LOCK_TIMEOUT {
            return Err(format!(
                "Lock timeout must be between 1ms and {}s",
                MAX_LOCK_TIMEOUT.as_secs()
            ));
        }

        if self.cache.key_ttl.is_zero() {
            return Err("Rate cache TTL cannot be 0".to_string());
        }

        if self.cache.key_ttl > MAX_RATE_CACHE_TTL {
            return Err(format!(
                "Rate cache TTL cannot exceed {}s",
                MAX_RATE_CACHE_TTL.as_secs()
            ));
        }

        if self.quote_api.url.is_empty() {
            return Err("Quote API URL cannot be empty".to_string());
        }

        if self.quote_api.timeout.is_zero() {
            return Err("Quote API timeout cannot be 0".to_string());
        }

        if self.currencies()?.is_empty() {
            return Err("At least one supported currency is required".to_string());
        }

        if self.notify_queue_capacity == 0 {
            return Err("Notification queue capacity cannot be 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.key_ttl, Duration::from_secs(60));
        assert_eq!(config.quote_api.timeout, Duration::from_secs(3));
        assert_eq!(config.currencies().unwrap().len(), 3);
    }

    #[test]
    fn test_from_lookup() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/bank"),
            ("RATE_CACHE_TTL_SECS", "120"),
            ("QUOTE_API_TIMEOUT_MS", "1500"),
            ("SUPPORTED_CURRENCIES", "usd, eur"),
            ("NOTIFY_QUEUE_CAPACITY", "not-a-number"),
        ]));

        assert_eq!(config.database.url, "postgres://db/bank");
        assert_eq!(config.cache.key_ttl, Duration::from_secs(120));
        assert_eq!(config.quote_api.timeout, Duration::from_millis(1500));
        assert_eq!(config.notify_queue_capacity, 1024);

        let codes: Vec<String> = config
            .currencies()
            .unwrap()
            .iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(codes, ["EUR", "USD"]);
    }

    #[test]
    fn test_huge_ttl_is_rejected() {
        let config = NodeConfig::from_lookup(lookup(&[(
            "RATE_CACHE_TTL_SECS",
            "18446744073709551615",
        )]));
        assert_eq!(config.cache.key_ttl, Duration::from_secs(u64::MAX));
        assert!(config.validate().is_err());

        let config = NodeConfig::from_lookup(lookup(&[("RATE_CACHE_TTL_SECS", "86400")]));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lock_timeout_and_cache_backend() {
        let config = NodeConfig::from_lookup(lookup(&[
            ("DATABASE_LOCK_TIMEOUT_MS", "250"),
            ("RATE_CACHE_BACKEND", "Postgres"),
        ]));
        assert_eq!(config.database.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.cache.backend, CacheBackend::Postgres);
        assert!(config.validate().is_ok());

        let config = NodeConfig::from_lookup(lookup(&[("DATABASE_LOCK_TIMEOUT_MS", "0")]));
        assert!(config.validate().is_err());

        let config = NodeConfig::from_lookup(lookup(&[("RATE_CACHE_BACKEND", "redis")]));
        assert_eq!(config.cache.backend, CacheBackend::Memory);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = NodeConfig::default();
        config.cache.key_ttl = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = NodeConfig::from_lookup(lookup(&[("SUPPORTED_CURRENCIES", "EUR,EURO")]));
        assert!(config.validate().is_err());

        let config = NodeConfig::from_lookup(lookup(&[("SUPPORTED_CURRENCIES", " , ")]));
        assert!(config.validate().is_err());
    }
}
