use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Conversion rates from the base currency: 1 base unit = `rate` units of a currency
///
/// Always holds the base currency at 1. Never mutated in place; updates build
/// a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    base: String,
    rates: BTreeMap<String, Decimal>,
    updated_at: Option<DateTime<Utc>>,
}

impl RateTable {
    /// Table holding only the base identity rate
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        let mut rates = BTreeMap::new();
        rates.insert(base.clone(), Decimal::ONE);
        Self {
            base,
            rates,
            updated_at: None,
        }
    }

    /// Table seeded with initial rates; non-positive entries and any entry for
    /// the base currency are ignored
    pub fn with_rates<I>(base: impl Into<String>, rates: I) -> Self
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let mut table = Self::new(base);
        for (currency, rate) in rates {
            if currency != table.base && rate > Decimal::ZERO {
                table.rates.insert(currency, rate);
            }
        }
        table
    }

    /// A new table with `updates` applied on top of this one
    ///
    /// Currencies missing from `updates` keep their current rate.
    pub fn updated<I>(&self, updates: I, at: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = (String, Decimal)>,
    {
        let mut next = self.clone();
        for (currency, rate) in updates {
            if currency != next.base && rate > Decimal::ZERO {
                next.rates.insert(currency, rate);
            }
        }
        next.updated_at = Some(at);
        next
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn rate(&self, currency: &str) -> Option<Decimal> {
        self.rates.get(currency).copied()
    }

    /// (currency, rate) pairs in currency order, base included
    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> {
        self.rates.iter().map(|(c, r)| (c.as_str(), *r))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// When the last successful refresh produced this table; `None` for fallback rates
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn to_map(&self) -> BTreeMap<String, Decimal> {
        self.rates.clone()
    }
}
