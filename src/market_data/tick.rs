use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A price as it arrived from upstream, before normalization
///
/// The price is kept as text; parsing it is the normalizer's job so that a
/// bad value is rejected at one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPrice {
    /// Upstream symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Price in the feed's base currency, as sent
    pub price: String,
    /// Upstream event time, or receive time when upstream sent none
    pub observed_at: DateTime<Utc>,
}

impl RawPrice {
    pub fn new(symbol: impl Into<String>, price: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price: price.into(),
            observed_at,
        }
    }
}

/// Canonical price tick, denominated in every supported currency
///
/// Immutable once built. Each tick supersedes the previous one for its symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// User-facing ticker (e.g. "BTC")
    pub symbol: String,
    /// When the price was observed upstream
    pub observed_at: DateTime<Utc>,
    /// Price in the base currency
    pub price_base: Decimal,
    /// Price per currency code, base currency included
    pub prices: BTreeMap<String, Decimal>,
}

impl Tick {
    /// Price in a given currency, if it was converted
    pub fn price_in(&self, currency: &str) -> Option<Decimal> {
        self.prices.get(currency).copied()
    }
}
