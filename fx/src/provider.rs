//! Quote source trait and implementations.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use microbank_common::{CurrencyCode, Rate};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FxError, FxResult};

/// A fresh price from an external source.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    /// Price of one unit in cash units.
    pub rate: Rate,
    /// When the source last updated the price, if it says.
    pub as_of: Option<DateTime<Utc>>,
}

/// Trait for external rate quote sources.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Fetch the current price of one unit of `currency`.
    async fn query_rate(&self, currency: &CurrencyCode) -> FxResult<Quote>;
}

/// Quote API client.
///
/// Issues `GET {url}?apikey={key}&currencies={CODE}` and expects
///
/// ```json
/// {"meta": {"last_updated_at": "2024-06-01T00:00:00Z"},
///  "data": {"EUR": {"code": "EUR", "value": 1.11}}}
/// ```
pub struct HttpQuoteSource {
    client: Client,
    url: String,
    api_key: String,
}

impl HttpQuoteSource {
    /// Create a client; every request is bounded by `timeout`.
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FxError::QuoteSource(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    fn name(&self) -> &str {
        "quote-api"
    }

    async fn query_rate(&self, currency: &CurrencyCode) -> FxResult<Quote> {
        info!(currency = %currency, "Querying rate");

        let response = self
            .client
            .get(&self.url)
            .query(&[("apikey", self.api_key.as_str()), ("currencies", currency.as_str())])
            .send()
            .await
            .map_err(|e| {
                warn!(currency = %currency, error = %e, "Quote request failed");
                if e.is_timeout() {
                    FxError::QuoteSource("request timed out".to_string())
                } else {
                    FxError::QuoteSource(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(currency = %currency, status = %status, "Quote source returned error status");
            return Err(FxError::QuoteSource(format!("unexpected status {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FxError::QuoteSource(format!("failed to read body: {e}")))?;

        let quote = parse_quote(&body, currency)?;

        info!(
            currency = %currency,
            rate = %quote.rate,
            as_of = ?quote.as_of,
            "Queried rate"
        );

        Ok(quote)
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    meta: Option<QuoteMeta>,
    data: HashMap<String, QuoteEntry>,
}

#[derive(Debug, Deserialize)]
struct QuoteMeta {
    last_updated_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteEntry {
    value: serde_json::Number,
}

/// Parse a quote API response body for `currency`.
pub fn parse_quote(body: &str, currency: &CurrencyCode) -> FxResult<Quote> {
    let malformed = |reason: String| FxError::MalformedQuote {
        currency: currency.clone(),
        reason,
    };

    let response: QuoteResponse =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;

    let entry = response
        .data
        .get(currency.as_str())
        .ok_or_else(|| malformed("currency missing from response".to_string()))?;

    // Parse from the literal text so 1.11 stays 1.11.
    let text = entry.value.to_string();
    let price = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| malformed(format!("value {text} is not a decimal")))?;

    let rate = Rate::new(price).map_err(|e| malformed(e.to_string()))?;

    let as_of = response
        .meta
        .and_then(|m| m.last_updated_at)
        .and_then(|ts| DateTime::parse_from_rfc3339(&ts).ok())
        .map(|ts| ts.with_timezone(&Utc));

    debug!(currency = %currency, rate = %rate, "Parsed quote");

    Ok(Quote { rate, as_of })
}

/// In-memory quote source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockQuoteSource {
    name: String,
    rates: dashmap::DashMap<CurrencyCode, Rate>,
    calls: std::sync::atomic::AtomicUsize,
    failing: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockQuoteSource {
    /// Create a new mock source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            failing: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Set the price for a currency.
    pub fn set_rate(&self, currency: CurrencyCode, price: Decimal) {
        let rate = Rate::new(price).expect("mock rates must be positive");
        self.rates.insert(currency, rate);
    }

    /// Make every subsequent query fail as if the source were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of queries received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl QuoteSource for MockQuoteSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn query_rate(&self, currency: &CurrencyCode) -> FxResult<Quote> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FxError::QuoteSource("connection refused".to_string()));
        }

        self.rates
            .get(currency)
            .map(|r| Quote {
                rate: *r,
                as_of: None,
            })
            .ok_or_else(|| FxError::MalformedQuote {
                currency: currency.clone(),
                reason: "currency missing from response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_quote() {
        let body = r#"{
            "meta": {"last_updated_at": "2024-06-01T23:59:59Z"},
            "data": {"EUR": {"code": "EUR", "value": 1.11}}
        }"#;

        let quote = parse_quote(body, &CurrencyCode::eur()).unwrap();

        assert_eq!(quote.rate.price(), dec!(1.11));
        assert_eq!(quote.rate.cents_per_unit().unwrap(), 111);
        assert!(quote.as_of.is_some());
    }

    #[test]
    fn test_parse_quote_without_meta() {
        let body = r#"{"data": {"RUB": {"code": "RUB", "value": 0.011}}}"#;

        let quote = parse_quote(body, &CurrencyCode::rub()).unwrap();

        assert_eq!(quote.rate.price(), dec!(0.011));
        assert!(quote.as_of.is_none());
    }

    #[test]
    fn test_parse_quote_missing_currency() {
        let body = r#"{"data": {"CNY": {"code": "CNY", "value": 0.14}}}"#;

        let result = parse_quote(body, &CurrencyCode::eur());

        assert!(matches!(result, Err(FxError::MalformedQuote { .. })));
    }

    #[test]
    fn test_parse_quote_rejects_bad_payloads() {
        let eur = CurrencyCode::eur();

        assert!(matches!(
            parse_quote("<html>busy</html>", &eur),
            Err(FxError::MalformedQuote { .. })
        ));
        assert!(matches!(
            parse_quote(r#"{"data": {"EUR": {"value": -1}}}"#, &eur),
            Err(FxError::MalformedQuote { .. })
        ));
        assert!(matches!(
            parse_quote(r#"{"data": {"EUR": {"value": "1.1"}}}"#, &eur),
            Err(FxError::MalformedQuote { .. })
        ));
    }

    #[tokio::test]
    async fn test_http_source_unreachable() {
        // Nothing listens on the discard port.
        let source =
            HttpQuoteSource::new("http://127.0.0.1:9/latest", "key", Duration::from_millis(500))
                .unwrap();

        let result = source.query_rate(&CurrencyCode::eur()).await;

        assert!(matches!(result, Err(FxError::QuoteSource(_))));
    }

    #[tokio::test]
    async fn test_mock_source() {
        let source = MockQuoteSource::new("test");
        source.set_rate(CurrencyCode::eur(), dec!(1.11));

        let quote = source.query_rate(&CurrencyCode::eur()).await.unwrap();
        assert_eq!(quote.rate.price(), dec!(1.11));

        source.set_failing(true);
        assert!(source.query_rate(&CurrencyCode::eur()).await.is_err());
        assert_eq!(source.calls(), 2);
    }
}
