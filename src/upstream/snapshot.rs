use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::client::PriceSource;
use crate::market_data::{SymbolSet, TickNormalizer};
use crate::websocket::Broadcaster;

/// One-shot batched price request that seeds subscribers
///
/// Runs at startup, and after every upstream reconnect, so subscribers hold
/// values before (or despite a gap in) the live stream.
#[derive(Clone)]
pub struct SnapshotFetcher {
    source: Arc<dyn PriceSource>,
    symbols: SymbolSet,
    normalizer: TickNormalizer,
    broadcaster: Broadcaster,
}

impl SnapshotFetcher {
    pub fn new(
        source: Arc<dyn PriceSource>,
        symbols: SymbolSet,
        normalizer: TickNormalizer,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            source,
            symbols,
            normalizer,
            broadcaster,
        }
    }

    /// Fetch and publish; returns the number of ticks published
    ///
    /// A failed request is logged and publishes nothing. Entries for symbols
    /// outside the set, repeats and unusable prices are dropped individually.
    pub async fn run(&self) -> usize {
        let entries = match self.source.fetch_prices(self.symbols.as_slice()).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Price snapshot failed");
                return 0;
            }
        };

        let observed_at = Utc::now();
        let mut seen = HashSet::new();
        let mut published = 0;

        for entry in entries {
            let symbol = entry.symbol.to_uppercase();
            if !self.symbols.contains(&symbol) || !seen.insert(symbol.clone()) {
                tracing::debug!(symbol = %entry.symbol, "Ignoring snapshot entry");
                continue;
            }

            let mut raw = entry.into_raw(observed_at);
            raw.symbol = symbol;

            match self.normalizer.normalize(&raw) {
                Ok(tick) => {
                    self.broadcaster.publish(tick);
                    published += 1;
                }
                Err(e) => tracing::warn!(error = %e, "Dropping snapshot entry"),
            }
        }

        tracing::info!(published, requested = self.symbols.len(), "Price snapshot published");
        published
    }
}
