use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market_data::Tick;

/// WebSocket message types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsMessage {
    /// Price tick, one field per currency (`"USD": 65000.12, "BRL": ...`)
    PriceUpdated {
        symbol: String,
        #[serde(flatten)]
        prices: BTreeMap<String, Decimal>,
        timestamp: DateTime<Utc>,
    },
    /// Subscription confirmation, with the full active filter
    Subscribed {
        symbols: Vec<String>,
    },
    /// Unsubscription confirmation, with the remaining filter
    Unsubscribed {
        symbols: Vec<String>,
    },
    /// Error message
    Error {
        message: String,
    },
    /// Heartbeat/Ping
    Ping {
        timestamp: DateTime<Utc>,
    },
    /// Pong response
    Pong {
        timestamp: DateTime<Utc>,
    },
}

impl From<&Tick> for WsMessage {
    fn from(tick: &Tick) -> Self {
        WsMessage::PriceUpdated {
            symbol: tick.symbol.clone(),
            prices: tick.prices.clone(),
            timestamp: tick.observed_at,
        }
    }
}

/// Client request
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Only receive these tickers (adds to the current filter)
    Subscribe {
        symbols: Vec<String>,
    },
    /// Stop receiving these tickers; an empty filter means all tickers
    Unsubscribe {
        symbols: Vec<String>,
    },
    Ping,
}
