//! Relay wiring
//!
//! Builds every component from [`RelayConfig`], spawns the concurrent
//! activities (rate refresh timer, startup snapshot, upstream stream) and owns
//! the shutdown signal they all watch.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{ApiState, AppState};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::market_data::{SymbolSet, TickNormalizer};
use crate::rates::RateCache;
use crate::upstream::{
    BinanceRestClient, BinanceStreamConnector, ConnectionState, PriceSource, SnapshotFetcher,
    StreamConnection, StreamConnector, StreamStats,
};
use crate::websocket::{Broadcaster, WsState};

/// Resolve once shutdown is requested; a dropped sender counts as a request
pub(crate) async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// A configured, not yet running relay
pub struct Relay {
    config: RelayConfig,
    symbols: SymbolSet,
    source: Arc<dyn PriceSource>,
    connector: Arc<dyn StreamConnector>,
}

impl Relay {
    /// Validate the configuration against explicit upstreams
    pub fn new(
        config: RelayConfig,
        source: Arc<dyn PriceSource>,
        connector: Arc<dyn StreamConnector>,
    ) -> Result<Self> {
        config.validate()?;
        let symbols = SymbolSet::new(&config.symbols)?;

        Ok(Self {
            config,
            symbols,
            source,
            connector,
        })
    }

    /// Relay against the Binance REST and stream endpoints from the config
    pub fn from_config(config: RelayConfig) -> Result<Self> {
        let source = Arc::new(BinanceRestClient::new(
            config.rest_base_url.as_str(),
            config.http_timeout(),
        )?);
        let connector = Arc::new(BinanceStreamConnector::new(config.ws_base_url.as_str()));
        Self::new(config, source, connector)
    }

    /// Spawn all relay activities on the current runtime
    pub fn start(self) -> RelayHandle {
        let config = self.config;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let broadcaster = Broadcaster::with_capacity(config.subscriber_buffer);
        let rates = Arc::new(RateCache::from_config(&config, Arc::clone(&self.source)));
        let normalizer = TickNormalizer::new(Arc::clone(&rates), config.quote_suffix.as_str());
        let snapshot = SnapshotFetcher::new(
            Arc::clone(&self.source),
            self.symbols.clone(),
            normalizer.clone(),
            broadcaster.clone(),
        );
        let connection = StreamConnection::new(
            self.connector,
            self.symbols.clone(),
            normalizer,
            broadcaster.clone(),
            config.reconnect_delay(),
        )
        .with_recovery(snapshot.clone())
        .with_timeouts(config.connect_timeout(), config.idle_timeout());
        let upstream = connection.state();
        let stream_stats = connection.stats();

        let mut tasks = Vec::with_capacity(3);

        tasks.push(tokio::spawn(
            Arc::clone(&rates).run(config.rate_refresh_interval(), shutdown_rx.clone()),
        ));

        let mut snapshot_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            tokio::select! {
                _ = snapshot.run() => {}
                _ = shutdown_signalled(&mut snapshot_shutdown) => {}
            }
        }));

        tasks.push(tokio::spawn(connection.run(shutdown_rx)));

        tracing::info!(
            symbols = self.symbols.len(),
            currencies = ?config.target_currencies,
            "Relay started"
        );

        RelayHandle {
            broadcaster,
            rates,
            source: self.source,
            upstream,
            stream_stats,
            shutdown_tx,
            tasks,
            started_at: Utc::now(),
        }
    }
}

/// A running relay
pub struct RelayHandle {
    broadcaster: Broadcaster,
    rates: Arc<RateCache>,
    source: Arc<dyn PriceSource>,
    upstream: watch::Receiver<ConnectionState>,
    stream_stats: Arc<StreamStats>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    started_at: DateTime<Utc>,
}

impl RelayHandle {
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn rates(&self) -> Arc<RateCache> {
        Arc::clone(&self.rates)
    }

    pub fn upstream_state(&self) -> watch::Receiver<ConnectionState> {
        self.upstream.clone()
    }

    /// Receiver that flips to `true` on shutdown
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// State for the REST handlers
    pub fn api_state(&self) -> AppState {
        Arc::new(ApiState {
            broadcaster: self.broadcaster.clone(),
            rates: Arc::clone(&self.rates),
            source: Arc::clone(&self.source),
            upstream: self.upstream.clone(),
            stream_stats: Arc::clone(&self.stream_stats),
            started_at: self.started_at,
        })
    }

    /// State for the WebSocket handler
    pub fn ws_state(&self) -> Arc<WsState> {
        Arc::new(WsState {
            broadcaster: self.broadcaster.clone(),
            shutdown: self.shutdown_receiver(),
        })
    }

    /// Signal every activity to stop and wait for them
    pub async fn shutdown(self) {
        tracing::info!("Relay shutting down");
        self.shutdown_tx.send_replace(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Relay task failed");
            }
        }

        tracing::info!("Relay stopped");
    }
}
