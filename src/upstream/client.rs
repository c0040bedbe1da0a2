use async_trait::async_trait;
use reqwest::Client as HttpClient;
use std::time::Duration;

use super::messages::PriceEntry;
use crate::error::{RelayError, Result};

/// Request/response access to current upstream prices
///
/// Used for the startup snapshot, rate refreshes and on-demand quotes.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Current prices for many symbols in a single request
    async fn fetch_prices(&self, symbols: &[String]) -> Result<Vec<PriceEntry>>;

    /// Current price for one symbol
    async fn fetch_price(&self, symbol: &str) -> Result<PriceEntry>;
}

/// Binance REST ticker-price client
pub struct BinanceRestClient {
    http: HttpClient,
    base_url: String,
}

impl BinanceRestClient {
    /// Create a client for `base_url` (e.g. `https://api.binance.com`)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn ticker_url(&self) -> String {
        format!("{}/api/v3/ticker/price", self.base_url)
    }
}

#[async_trait]
impl PriceSource for BinanceRestClient {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<Vec<PriceEntry>> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        // Batched form: ?symbols=["BTCUSDT","ETHUSDT"]
        let symbols_param = serde_json::to_string(symbols)?;
        tracing::debug!(count = symbols.len(), "Fetching price snapshot");

        let entries = self
            .http
            .get(self.ticker_url())
            .query(&[("symbols", symbols_param.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<PriceEntry>>()
            .await?;

        Ok(entries)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceEntry> {
        let entry = self
            .http
            .get(self.ticker_url())
            .query(&[("symbol", symbol)])
            .send()
            .await?
            .error_for_status()?
            .json::<PriceEntry>()
            .await?;

        if !entry.symbol.eq_ignore_ascii_case(symbol) {
            return Err(RelayError::Upstream(format!(
                "asked for {}, got {}",
                symbol, entry.symbol
            )));
        }
        Ok(entry)
    }
}
