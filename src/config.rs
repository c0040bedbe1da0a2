use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{RelayError, Result};

/// Static relay configuration, read once at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the HTTP/WebSocket server listens on
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Upstream streaming endpoint (scheme + host + port)
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,

    /// Upstream REST endpoint used for price and rate snapshots
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,

    /// Instrument symbols to subscribe to (e.g. "BTCUSDT")
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Currency the feed reports prices in
    #[serde(default = "default_base_currency")]
    pub base_currency: String,

    /// Quote asset suffix stripped from symbols for display, and prefixed to
    /// target currencies to build rate pairs (USDT + BRL = USDTBRL)
    #[serde(default = "default_quote_suffix")]
    pub quote_suffix: String,

    /// Currencies every tick is converted into, besides the base
    #[serde(default = "default_target_currencies")]
    pub target_currencies: Vec<String>,

    /// Rates used until the first successful refresh
    #[serde(default = "default_fallback_rates")]
    pub fallback_rates: BTreeMap<String, Decimal>,

    /// Rate refresh interval in seconds
    #[serde(default = "default_rate_refresh_secs")]
    pub rate_refresh_secs: u64,

    /// Fixed delay before reconnecting to the upstream stream, in seconds
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,

    /// Upper bound on one upstream connect attempt, in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Upstream silence after which the stream is reconnected, in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Per-subscriber queue capacity; ticks beyond it are dropped for that subscriber
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Timeout for upstream REST calls, in seconds
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ws_base_url: default_ws_base_url(),
            rest_base_url: default_rest_base_url(),
            symbols: default_symbols(),
            base_currency: default_base_currency(),
            quote_suffix: default_quote_suffix(),
            target_currencies: default_target_currencies(),
            fallback_rates: default_fallback_rates(),
            rate_refresh_secs: default_rate_refresh_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            subscriber_buffer: default_subscriber_buffer(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl RelayConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    ///
    /// Unset variables fall back to defaults; set-but-unparsable ones are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("RELAY_BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("RELAY_WS_BASE_URL") {
            config.ws_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("RELAY_REST_BASE_URL") {
            config.rest_base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = lookup("RELAY_SYMBOLS") {
            config.symbols = split_list(&v);
        }
        if let Some(v) = lookup("RELAY_BASE_CURRENCY") {
            config.base_currency = v.trim().to_uppercase();
        }
        if let Some(v) = lookup("RELAY_QUOTE_SUFFIX") {
            config.quote_suffix = v.trim().to_uppercase();
        }
        if let Some(v) = lookup("RELAY_TARGET_CURRENCIES") {
            config.target_currencies = split_list(&v);
        }
        if let Some(v) = lookup("RELAY_FALLBACK_RATES") {
            config.fallback_rates = parse_rates(&v)?;
        }
        if let Some(v) = lookup("RELAY_RATE_REFRESH_SECS") {
            config.rate_refresh_secs = parse_number("RELAY_RATE_REFRESH_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_RECONNECT_DELAY_SECS") {
            config.reconnect_delay_secs = parse_number("RELAY_RECONNECT_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout_secs = parse_number("RELAY_CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_IDLE_TIMEOUT_SECS") {
            config.idle_timeout_secs = parse_number("RELAY_IDLE_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("RELAY_SUBSCRIBER_BUFFER") {
            config.subscriber_buffer = parse_number("RELAY_SUBSCRIBER_BUFFER", &v)?;
        }
        if let Some(v) = lookup("RELAY_HTTP_TIMEOUT_SECS") {
            config.http_timeout_secs = parse_number("RELAY_HTTP_TIMEOUT_SECS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.symbols.iter().all(|s| s.trim().is_empty()) {
            return Err(RelayError::Config("no symbols configured".to_string()));
        }
        if self.base_currency.trim().is_empty() {
            return Err(RelayError::Config("base currency must not be empty".to_string()));
        }
        if self.rate_refresh_secs == 0 {
            return Err(RelayError::Config("rate refresh interval must be positive".to_string()));
        }
        if self.reconnect_delay_secs == 0 {
            return Err(RelayError::Config("reconnect delay must be positive".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(RelayError::Config("connect timeout must be positive".to_string()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(RelayError::Config("idle timeout must be positive".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(RelayError::Config("subscriber buffer must be positive".to_string()));
        }
        if let Some((currency, rate)) = self.fallback_rates.iter().find(|(_, r)| **r <= Decimal::ZERO) {
            return Err(RelayError::Config(format!(
                "fallback rate for {} must be positive, got {}",
                currency, rate
            )));
        }
        Ok(())
    }

    pub fn rate_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.rate_refresh_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| RelayError::Config(format!("{} is not a valid number: {}", key, value)))
}

/// Parse "BRL=5.0,EUR=0.9"
fn parse_rates(value: &str) -> Result<BTreeMap<String, Decimal>> {
    let mut rates = BTreeMap::new();
    for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (currency, rate) = entry
            .split_once('=')
            .ok_or_else(|| RelayError::Config(format!("malformed rate entry: {}", entry)))?;
        let rate = Decimal::from_str(rate.trim())
            .map_err(|_| RelayError::Config(format!("malformed rate entry: {}", entry)))?;
        rates.insert(currency.trim().to_uppercase(), rate);
    }
    Ok(rates)
}

// Default value functions for serde
fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_symbols() -> Vec<String> {
    [
        "BTCUSDT", "ETHUSDT", "BNBUSDT", "ADAUSDT", "XRPUSDT", "SOLUSDT", "DOGEUSDT",
        "MATICUSDT", "DOTUSDT", "SHIBUSDT", "LTCUSDT", "AVAXUSDT", "UNIUSDT", "LINKUSDT",
        "ATOMUSDT", "TRXUSDT", "ETCUSDT", "XLMUSDT", "NEARUSDT", "APTUSDT",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_base_currency() -> String {
    "USD".to_string()
}

fn default_quote_suffix() -> String {
    "USDT".to_string()
}

fn default_target_currencies() -> Vec<String> {
    vec!["BRL".to_string(), "EUR".to_string()]
}

fn default_fallback_rates() -> BTreeMap<String, Decimal> {
    BTreeMap::from([
        ("BRL".to_string(), Decimal::new(50, 1)),
        ("EUR".to_string(), Decimal::new(9, 1)),
    ])
}

fn default_rate_refresh_secs() -> u64 {
    60
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_http_timeout_secs() -> u64 {
    10
}
