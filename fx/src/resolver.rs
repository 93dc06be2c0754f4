//! Cache-aside rate resolution.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use microbank_common::{CurrencyCode, MonetaryError, Rate, RequestContext};
use tracing::{debug, info, instrument, warn};

use crate::cache::RateCache;
use crate::error::{FxError, FxResult};
use crate::provider::QuoteSource;

/// Resolves the price of one unit of a currency in cash units.
#[async_trait]
pub trait RateResolver: Send + Sync {
    /// Get the current rate for `currency`.
    async fn get_rate(&self, ctx: &RequestContext, currency: &CurrencyCode) -> FxResult<Rate>;

    /// Whether `currency` is in the supported set.
    fn supports(&self, currency: &CurrencyCode) -> bool;
}

/// Configuration for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a fetched rate stays in the cache.
    pub ttl: Duration,
    /// Closed set of currencies that can be priced.
    pub supported: BTreeSet<CurrencyCode>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            supported: [CurrencyCode::rub(), CurrencyCode::eur(), CurrencyCode::cny()]
                .into_iter()
                .collect(),
        }
    }
}

/// Resolver that prefers the cache and falls back to the quote source.
///
/// On a miss the fetched rate is written back with the configured TTL. A failed
/// write is returned as an error even though the rate itself was fetched, so
/// the outcome of a call never depends on cache write timing.
pub struct CachedRateResolver {
    source: Arc<dyn QuoteSource>,
    cache: Arc<dyn RateCache>,
    config: ResolverConfig,
}

impl CachedRateResolver {
    /// Create a resolver over `source` and `cache`.
    pub fn new(
        source: Arc<dyn QuoteSource>,
        cache: Arc<dyn RateCache>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            source,
            cache,
            config,
        }
    }
}

#[async_trait]
impl RateResolver for CachedRateResolver {
    #[instrument(skip(self, ctx), fields(request_id = %ctx.id(), currency = %currency))]
    async fn get_rate(&self, ctx: &RequestContext, currency: &CurrencyCode) -> FxResult<Rate> {
        if !self.supports(currency) {
            return Err(FxError::UnsupportedCurrency(currency.clone()));
        }

        let key = currency.as_str();

        if let Some(raw) = ctx.run(self.cache.get(key)).await?? {
            match usable_rate(&raw) {
                Ok(rate) => {
                    debug!(rate = %rate, "Cache hit");
                    return Ok(rate);
                }
                // Overwritten below with a fresh quote.
                Err(e) => warn!(value = %raw, error = %e, "Discarding unreadable cached rate"),
            }
        } else {
            debug!("Cache miss");
        }

        let quote = ctx.run(self.source.query_rate(currency)).await??;
        quote.rate.cents_per_unit()?;

        ctx.run(self.cache.set(key, quote.rate.to_string(), self.config.ttl))
            .await??;

        info!(
            source = self.source.name(),
            rate = %quote.rate,
            ttl_secs = self.config.ttl.as_secs(),
            "Rate refreshed"
        );

        Ok(quote.rate)
    }

    fn supports(&self, currency: &CurrencyCode) -> bool {
        self.config.supported.contains(currency)
    }
}

/// Parse a cached value, rejecting rates that could not price a purchase.
fn usable_rate(raw: &str) -> Result<Rate, MonetaryError> {
    let rate = raw.parse::<Rate>()?;
    rate.cents_per_unit()?;
    Ok(rate)
}
