use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use crate::market_data::Tick;
use crate::rates::{RateCacheStats, RateTable};
use crate::upstream::{ConnectionState, StreamStatsSnapshot};
use crate::websocket::BroadcastStats;

/// Relay health
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" while subscribed upstream, "degraded" otherwise
    #[schema(example = "healthy")]
    pub status: String,
    pub upstream: ConnectionState,
    pub stream: StreamStatsSnapshot,
    pub broadcast: BroadcastStats,
    pub rates: RateCacheStats,
    #[schema(value_type = Object, example = json!({"USD": 1.0, "BRL": 5.0, "EUR": 0.9}))]
    pub current_rates: BTreeMap<String, Decimal>,
    pub uptime_secs: i64,
    pub timestamp: DateTime<Utc>,
}

/// Latest price of one ticker in every currency
#[derive(Debug, Serialize, ToSchema)]
pub struct PriceResponse {
    #[schema(example = "BTC")]
    pub symbol: String,
    #[schema(value_type = f64, example = 65000.12)]
    pub price_base: Decimal,
    #[schema(value_type = Object, example = json!({"USD": 65000.12, "BRL": 325000.6}))]
    pub prices: BTreeMap<String, Decimal>,
    pub observed_at: DateTime<Utc>,
}

impl From<&Tick> for PriceResponse {
    fn from(tick: &Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            price_base: tick.price_base,
            prices: tick.prices.clone(),
            observed_at: tick.observed_at,
        }
    }
}

/// Latest prices list
#[derive(Debug, Serialize, ToSchema)]
pub struct PriceListResponse {
    pub prices: Vec<PriceResponse>,
    pub count: usize,
}

/// Current conversion rates
#[derive(Debug, Serialize, ToSchema)]
pub struct RatesResponse {
    #[schema(example = "USD")]
    pub base: String,
    #[schema(value_type = Object, example = json!({"USD": 1.0, "BRL": 5.0, "EUR": 0.9}))]
    pub rates: BTreeMap<String, Decimal>,
    /// Last successful refresh; absent while still on fallback rates
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&RateTable> for RatesResponse {
    fn from(table: &RateTable) -> Self {
        Self {
            base: table.base().to_string(),
            rates: table.to_map(),
            updated_at: table.updated_at(),
        }
    }
}

/// Query parameters for on-demand quotes
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct QuoteQuery {
    /// Comma-separated tickers, e.g. `BTC,ETH`
    pub symbols: Option<String>,
    /// Quote currency, e.g. `BRL`
    pub convert: Option<String>,
}

/// One quoted pair; carries either a price or an error
#[derive(Debug, Serialize, ToSchema)]
pub struct QuoteItem {
    #[schema(example = "BTC")]
    pub symbol: String,
    #[schema(example = "BTCBRL")]
    pub pair: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<f64>, example = 350000.5)]
    pub price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// On-demand quotes
#[derive(Debug, Serialize, ToSchema)]
pub struct QuotesResponse {
    #[schema(example = "BRL")]
    pub convert: String,
    pub quotes: Vec<QuoteItem>,
    pub timestamp: DateTime<Utc>,
}

/// Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
