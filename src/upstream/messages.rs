use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;
use crate::market_data::RawPrice;

/// A price that upstream may send either as a string or as a JSON number
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PriceField {
    Text(String),
    Number(serde_json::Number),
}

impl PriceField {
    pub fn as_text(&self) -> String {
        match self {
            PriceField::Text(text) => text.clone(),
            PriceField::Number(number) => number.to_string(),
        }
    }
}

/// One entry of a REST price response: `{"symbol": "BTCUSDT", "price": "65000.12"}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceEntry {
    pub symbol: String,
    pub price: PriceField,
}

impl PriceEntry {
    pub fn new(symbol: &str, price: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            price: PriceField::Text(price.to_string()),
        }
    }

    pub fn into_raw(self, observed_at: DateTime<Utc>) -> RawPrice {
        RawPrice {
            symbol: self.symbol,
            price: self.price.as_text(),
            observed_at,
        }
    }
}

/// 24h ticker event fields the relay cares about
///
/// Everything is optional so that a schema mismatch is a discard, not an error.
#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "s")]
    symbol: Option<String>,
    #[serde(rename = "c")]
    last_price: Option<PriceField>,
    #[serde(rename = "E")]
    event_time_ms: Option<i64>,
}

/// Outcome of decoding one stream frame
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A well-formed price
    Price(RawPrice),
    /// Valid JSON that is not a price tick (subscription acks, other events)
    Skip,
}

/// Decode one text frame from the combined stream
///
/// Accepts `{"stream": ..., "data": {...}}` envelopes and bare event objects.
/// Invalid JSON is an error; valid JSON without a symbol and price is a skip.
pub fn decode_stream_frame(text: &str, received_at: DateTime<Utc>) -> Result<Decoded> {
    let mut value: Value = serde_json::from_str(text)?;

    let payload = if value.get("data").is_some() {
        value["data"].take()
    } else {
        value
    };
    if !payload.is_object() {
        return Ok(Decoded::Skip);
    }

    let event: TickerEvent = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(_) => return Ok(Decoded::Skip),
    };

    match (event.symbol, event.last_price) {
        (Some(symbol), Some(price)) if !symbol.is_empty() => {
            let observed_at = event
                .event_time_ms
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or(received_at);
            Ok(Decoded::Price(RawPrice {
                symbol: symbol.to_uppercase(),
                price: price.as_text(),
                observed_at,
            }))
        }
        _ => Ok(Decoded::Skip),
    }
}
