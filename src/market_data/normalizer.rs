use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use super::tick::{RawPrice, Tick};
use crate::error::{RelayError, Result};
use crate::rates::{RateCache, RateTable};

/// Convert one raw price into a [`Tick`] using a single rate table
///
/// Pure: the same inputs always give the same tick. Every currency in the
/// table gets `price * rate`, the base included (its rate is 1). The quote
/// suffix is stripped from the symbol for display ("BTCUSDT" -> "BTC").
pub fn normalize(raw: &RawPrice, rates: &RateTable, quote_suffix: &str) -> Result<Tick> {
    let price_base = parse_price(&raw.symbol, &raw.price)?;

    let mut prices = BTreeMap::new();
    for (currency, rate) in rates.iter() {
        let converted = price_base
            .checked_mul(rate)
            .ok_or_else(|| invalid_price(&raw.symbol, &raw.price))?;
        prices.insert(currency.to_string(), converted);
    }

    Ok(Tick {
        symbol: display_symbol(&raw.symbol, quote_suffix),
        observed_at: raw.observed_at,
        price_base,
        prices,
    })
}

/// Strip the quote suffix, unless that would leave nothing
fn display_symbol(symbol: &str, quote_suffix: &str) -> String {
    if quote_suffix.is_empty() {
        return symbol.to_string();
    }
    match symbol.strip_suffix(quote_suffix) {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => symbol.to_string(),
    }
}

fn parse_price(symbol: &str, value: &str) -> Result<Decimal> {
    let trimmed = value.trim();
    let price = Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|_| invalid_price(symbol, value))?;

    if price.is_sign_negative() {
        return Err(invalid_price(symbol, value));
    }
    Ok(price)
}

fn invalid_price(symbol: &str, value: &str) -> RelayError {
    RelayError::InvalidPrice {
        symbol: symbol.to_string(),
        value: value.to_string(),
    }
}

/// Normalizer bound to the live rate cache
///
/// Takes one snapshot of the rate table per tick, so a tick is never built
/// from two different tables.
#[derive(Clone)]
pub struct TickNormalizer {
    rates: Arc<RateCache>,
    quote_suffix: String,
}

impl TickNormalizer {
    pub fn new(rates: Arc<RateCache>, quote_suffix: impl Into<String>) -> Self {
        Self {
            rates,
            quote_suffix: quote_suffix.into(),
        }
    }

    pub fn normalize(&self, raw: &RawPrice) -> Result<Tick> {
        let table = self.rates.get();
        normalize(raw, &table, &self.quote_suffix)
    }
}
