//! MicroBank FX
//!
//! Resolves the price of a currency in cash units for the ledger engine.
//!
//! # Features
//!
//! - Cache-aside resolution: cached price first, external quote on miss
//! - Pluggable quote sources (HTTP quote API, in-memory mock for tests)
//! - Pluggable key-value cache with per-key TTL (in-process or a shared
//!   PostgreSQL table)
//! - Closed set of supported currencies
//!
//! # Example
//!
//! ```rust,ignore
//! use microbank_fx::{CachedRateResolver, HttpQuoteSource, MemoryRateCache, ResolverConfig};
//!
//! let source = Arc::new(HttpQuoteSource::new(url, api_key, Duration::from_secs(3))?);
//! let cache = Arc::new(MemoryRateCache::new());
//! let resolver = CachedRateResolver::new(source, cache, ResolverConfig::default());
//!
//! let rate = resolver.get_rate(&ctx, &CurrencyCode::eur()).await?;
//! ```

pub mod cache;
pub mod error;
pub mod pg_cache;
pub mod provider;
pub mod resolver;

pub use cache::{CacheStats, CacheSweep, MemoryRateCache, RateCache};
pub use error::{FxError, FxResult};
pub use pg_cache::PgRateCache;
pub use provider::{HttpQuoteSource, Quote, QuoteSource};
pub use resolver::{CachedRateResolver, RateResolver, ResolverConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockQuoteSource;
