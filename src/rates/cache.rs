use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use utoipa::ToSchema;

use super::table::RateTable;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};
use crate::relay::shutdown_signalled;
use crate::upstream::PriceSource;

/// Rate cache statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RateCacheStats {
    /// Successful refreshes since startup
    pub refreshes: u64,
    /// Failed refreshes since startup
    pub failures: u64,
    /// Time of the last successful refresh
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Holds the current conversion rates and refreshes them from upstream
///
/// The table lives behind an `Arc` that is swapped whole. The write lock is
/// held only for the swap itself, never across a fetch.
pub struct RateCache {
    table: RwLock<Arc<RateTable>>,
    source: Arc<dyn PriceSource>,
    /// (currency, upstream pair symbol), e.g. ("BRL", "USDTBRL")
    pairs: Vec<(String, String)>,
    refreshes: AtomicU64,
    failures: AtomicU64,
}

impl RateCache {
    /// Create a cache starting from `initial`, refreshing one pair per target currency
    pub fn new(
        source: Arc<dyn PriceSource>,
        initial: RateTable,
        pair_prefix: &str,
        targets: &[String],
    ) -> Self {
        let pairs = targets
            .iter()
            .filter(|currency| currency.as_str() != initial.base())
            .map(|currency| (currency.clone(), format!("{}{}", pair_prefix, currency)))
            .collect();

        Self {
            table: RwLock::new(Arc::new(initial)),
            source,
            pairs,
            refreshes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Create a cache seeded with the configured fallback rates
    pub fn from_config(config: &RelayConfig, source: Arc<dyn PriceSource>) -> Self {
        let fallback = config
            .fallback_rates
            .iter()
            .filter(|(currency, _)| config.target_currencies.contains(*currency))
            .map(|(currency, rate)| (currency.clone(), *rate));
        let initial = RateTable::with_rates(config.base_currency.clone(), fallback);

        Self::new(source, initial, &config.quote_suffix, &config.target_currencies)
    }

    /// Current rate table
    pub fn get(&self) -> Arc<RateTable> {
        self.table.read().clone()
    }

    /// Fetch all rate pairs in one request and swap in the resulting table
    ///
    /// On failure the current table is left as it is.
    pub async fn refresh(&self) -> Result<()> {
        if self.pairs.is_empty() {
            return Ok(());
        }

        let symbols: Vec<String> = self.pairs.iter().map(|(_, pair)| pair.clone()).collect();

        let entries = match self.source.fetch_prices(&symbols).await {
            Ok(entries) => entries,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Rate refresh failed, keeping previous rates");
                return Err(e);
            }
        };

        let mut updates: Vec<(String, Decimal)> = Vec::with_capacity(self.pairs.len());
        for (currency, pair) in &self.pairs {
            let rate = entries
                .iter()
                .find(|entry| entry.symbol.eq_ignore_ascii_case(pair))
                .and_then(|entry| Decimal::from_str(entry.price.as_text().trim()).ok())
                .filter(|rate| *rate > Decimal::ZERO);

            match rate {
                Some(rate) => updates.push((currency.clone(), rate)),
                None => tracing::warn!(pair = %pair, "Rate missing or invalid in response"),
            }
        }

        if updates.is_empty() {
            self.failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!("Rate response carried no usable rates, keeping previous rates");
            return Err(RelayError::Upstream("no usable rates in response".to_string()));
        }

        let next = {
            let mut guard = self.table.write();
            let next = Arc::new(guard.updated(updates, Utc::now()));
            *guard = Arc::clone(&next);
            next
        };
        self.refreshes.fetch_add(1, Ordering::Relaxed);

        tracing::info!(rates = ?next.to_map(), "Rates updated");
        Ok(())
    }

    /// Refresh now, then every `period`, until shutdown
    ///
    /// A failed refresh just waits for the next tick; there is no backoff.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "Rate refresh loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }
            tokio::select! {
                _ = self.refresh() => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }
        }

        tracing::info!("Rate refresh loop stopped");
    }

    pub fn stats(&self) -> RateCacheStats {
        RateCacheStats {
            refreshes: self.refreshes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            last_refresh: self.get().updated_at(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{normalize, RawPrice};
    use crate::upstream::mock::MockPriceSource;
    use crate::upstream::PriceEntry;
    use rust_decimal_macros::dec;

    fn targets() -> Vec<String> {
        vec!["BRL".to_string(), "EUR".to_string()]
    }

    fn seeded() -> RateTable {
        RateTable::with_rates(
            "USD",
            [("BRL".to_string(), dec!(5.0)), ("EUR".to_string(), dec!(0.9))],
        )
    }

    #[tokio::test]
    async fn test_refresh_replaces_table() {
        let source = Arc::new(MockPriceSource::replying(vec![Ok(vec![
            PriceEntry::new("USDTBRL", "5.41"),
            PriceEntry::new("USDTEUR", "0.93"),
        ])]));
        let cache = RateCache::new(source.clone(), seeded(), "USDT", &targets());

        cache.refresh().await.unwrap();

        let table = cache.get();
        assert_eq!(table.rate("USD"), Some(Decimal::ONE));
        assert_eq!(table.rate("BRL"), Some(dec!(5.41)));
        assert_eq!(table.rate("EUR"), Some(dec!(0.93)));
        assert!(table.updated_at().is_some());
        assert_eq!(source.requests()[0], vec!["USDTBRL", "USDTEUR"]);
        assert_eq!(cache.stats().refreshes, 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_table() {
        let source = Arc::new(MockPriceSource::replying(vec![
            Ok(vec![
                PriceEntry::new("USDTBRL", "5.41"),
                PriceEntry::new("USDTEUR", "0.93"),
            ]),
            Err("connection reset".to_string()),
        ]));
        let cache = RateCache::new(source, seeded(), "USDT", &targets());

        cache.refresh().await.unwrap();
        let before = cache.get();

        assert!(cache.refresh().await.is_err());

        let after = cache.get();
        assert_eq!(*after, *before);
        assert_eq!(after.rate("BRL"), Some(dec!(5.41)));
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_partial_response_keeps_missing_currency() {
        let source = Arc::new(MockPriceSource::replying(vec![Ok(vec![
            PriceEntry::new("USDTBRL", "5.60"),
            PriceEntry::new("USDTEUR", "garbage"),
        ])]));
        let cache = RateCache::new(source, seeded(), "USDT", &targets());

        cache.refresh().await.unwrap();

        let table = cache.get();
        assert_eq!(table.rate("BRL"), Some(dec!(5.60)));
        assert_eq!(table.rate("EUR"), Some(dec!(0.9)));
    }

    #[tokio::test]
    async fn test_empty_response_is_a_failure() {
        let source = Arc::new(MockPriceSource::replying(vec![Ok(vec![])]));
        let cache = RateCache::new(source, seeded(), "USDT", &targets());

        assert!(cache.refresh().await.is_err());
        assert_eq!(*cache.get(), seeded());
    }

    #[tokio::test]
    async fn test_readers_never_see_mixed_tables() {
        // Generation n publishes BRL = n and EUR = 2n, so any mix breaks EUR == 2 * BRL.
        let source = Arc::new(MockPriceSource::from_fn(|call, _| {
            let n = Decimal::from(call as u64 + 1);
            Ok(vec![
                PriceEntry::new("USDTBRL", &n.to_string()),
                PriceEntry::new("USDTEUR", &(n * Decimal::TWO).to_string()),
            ])
        }));
        let initial = RateTable::with_rates(
            "USD",
            [("BRL".to_string(), dec!(1)), ("EUR".to_string(), dec!(2))],
        );
        let cache = Arc::new(RateCache::new(source, initial, "USDT", &targets()));

        let writer = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for _ in 0..200 {
                    cache.refresh().await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            readers.push(tokio::spawn(async move {
                let raw = RawPrice::new("BTCUSDT", "10", Utc::now());
                for _ in 0..500 {
                    let tick = normalize(&raw, &cache.get(), "USDT").unwrap();
                    let brl = tick.price_in("BRL").unwrap();
                    let eur = tick.price_in("EUR").unwrap();
                    assert_eq!(eur, brl * Decimal::TWO);
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_refreshes_eagerly_and_stops_on_shutdown() {
        let source = Arc::new(MockPriceSource::from_fn(|_, _| {
            Ok(vec![PriceEntry::new("USDTBRL", "5.5")])
        }));
        let cache = Arc::new(RateCache::new(source.clone(), seeded(), "USDT", &targets()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(Arc::clone(&cache).run(Duration::from_secs(60), shutdown_rx));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.calls(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 2);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cache.get().rate("BRL"), Some(dec!(5.5)));
    }
}
