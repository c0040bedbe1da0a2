use async_trait::async_trait;
use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use utoipa::ToSchema;

use super::messages::{decode_stream_frame, Decoded};
use super::snapshot::SnapshotFetcher;
use crate::error::{RelayError, Result};
use crate::market_data::{SymbolSet, TickNormalizer};
use crate::relay::shutdown_signalled;
use crate::websocket::Broadcaster;

/// Upstream connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
}

/// One frame read from the upstream subscription
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Text(String),
    /// Upstream closed the connection, with its reason if it gave one
    Close(Option<String>),
}

pub type FrameStream = BoxStream<'static, Result<StreamFrame>>;

/// Opens the multiplexed upstream subscription for a symbol set
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, symbols: &SymbolSet) -> Result<FrameStream>;
}

/// Binance combined-stream connector (`/stream?streams=a@ticker/b@ticker`)
pub struct BinanceStreamConnector {
    base_url: String,
}

impl BinanceStreamConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn stream_url(&self, symbols: &SymbolSet) -> String {
        format!("{}/stream?streams={}", self.base_url, symbols.stream_names().join("/"))
    }
}

#[async_trait]
impl StreamConnector for BinanceStreamConnector {
    async fn connect(&self, symbols: &SymbolSet) -> Result<FrameStream> {
        let url = self.stream_url(symbols);
        let (ws_stream, response) = connect_async(url.as_str()).await?;

        tracing::info!(status = %response.status(), streams = symbols.len(), "Upstream WebSocket connected");

        // tungstenite answers pings itself while the stream is being read
        let frames = ws_stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(StreamFrame::Text(text))),
                Ok(Message::Binary(data)) => Some(Ok(StreamFrame::Text(
                    String::from_utf8_lossy(&data).into_owned(),
                ))),
                Ok(Message::Close(frame)) => {
                    Some(Ok(StreamFrame::Close(frame.map(|f| f.reason.to_string()))))
                }
                Ok(_) => None,
                Err(e) => Some(Err(RelayError::from(e))),
            }
        });

        Ok(frames.boxed())
    }
}

/// Counters for the upstream stream
#[derive(Debug, Default)]
pub struct StreamStats {
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    ticks_published: AtomicU64,
    messages_skipped: AtomicU64,
    messages_malformed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StreamStatsSnapshot {
    /// Connection attempts, successful or not
    pub connect_attempts: u64,
    /// Attempts that reached the subscribed state
    pub connections: u64,
    pub ticks_published: u64,
    /// Frames that were valid JSON but not price ticks
    pub messages_skipped: u64,
    /// Frames dropped as undecodable or with unusable prices
    pub messages_malformed: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            ticks_published: self.ticks_published.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
        }
    }
}

/// Default bound on one connect attempt, handshake included
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default silence after which a subscribed stream is treated as dead
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a subscribed read loop ended
enum ReadEnd {
    Shutdown,
    Closed(String),
}

/// Long-lived upstream subscription
///
/// State machine: `Disconnected -> Connecting -> Subscribed -> Disconnected`.
/// After every drop to `Disconnected` it waits the fixed reconnect delay and
/// tries again, forever, until shutdown.
pub struct StreamConnection {
    connector: Arc<dyn StreamConnector>,
    symbols: SymbolSet,
    normalizer: TickNormalizer,
    broadcaster: Broadcaster,
    reconnect_delay: Duration,
    connect_timeout: Duration,
    idle_timeout: Duration,
    /// Snapshot run after a re-subscription to cover the outage gap
    recovery: Option<SnapshotFetcher>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<StreamStats>,
}

impl StreamConnection {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        symbols: SymbolSet,
        normalizer: TickNormalizer,
        broadcaster: Broadcaster,
        reconnect_delay: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            symbols,
            normalizer,
            broadcaster,
            reconnect_delay,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            recovery: None,
            state_tx,
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Re-seed subscribers from a snapshot after each reconnect
    pub fn with_recovery(mut self, recovery: SnapshotFetcher) -> Self {
        self.recovery = Some(recovery);
        self
    }

    /// Bound connect attempts and upstream silence
    pub fn with_timeouts(mut self, connect_timeout: Duration, idle_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self.idle_timeout = idle_timeout;
        self
    }

    /// Watch the connection state
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn stats(&self) -> Arc<StreamStats> {
        Arc::clone(&self.stats)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    /// Drive the connection until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut subscribed_before = false;

        loop {
            self.set_state(ConnectionState::Connecting);
            let attempt = self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::info!(attempt, symbols = self.symbols.len(), "Connecting to upstream stream");

            let connected = tokio::select! {
                result = tokio::time::timeout(self.connect_timeout, self.connector.connect(&self.symbols)) => {
                    result.unwrap_or_else(|_| {
                        Err(RelayError::Upstream(format!(
                            "connect timed out after {}s",
                            self.connect_timeout.as_secs_f64()
                        )))
                    })
                }
                _ = shutdown_signalled(&mut shutdown) => break,
            };

            match connected {
                Ok(frames) => {
                    self.set_state(ConnectionState::Subscribed);
                    self.stats.connections.fetch_add(1, Ordering::Relaxed);
                    tracing::info!("Subscribed to upstream stream");

                    if subscribed_before {
                        if let Some(recovery) = &self.recovery {
                            spawn_recovery(recovery.clone(), shutdown.clone());
                        }
                    }
                    subscribed_before = true;

                    match self.read_loop(frames, &mut shutdown).await {
                        ReadEnd::Shutdown => break,
                        ReadEnd::Closed(reason) => {
                            tracing::warn!(reason = %reason, "Upstream stream closed");
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(error = %e, attempt, "Upstream connection failed");
                }
                Err(e) => {
                    tracing::error!(error = %e, attempt, "Upstream connection failed, retrying anyway");
                }
            }

            self.set_state(ConnectionState::Disconnected);
            tracing::info!(
                delay_secs = self.reconnect_delay.as_secs_f64(),
                "Reconnecting to upstream after delay"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown_signalled(&mut shutdown) => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        tracing::info!("Upstream stream stopped");
    }

    async fn read_loop(&self, mut frames: FrameStream, shutdown: &mut watch::Receiver<bool>) -> ReadEnd {
        loop {
            let frame = tokio::select! {
                frame = frames.next() => frame,
                _ = tokio::time::sleep(self.idle_timeout) => {
                    return ReadEnd::Closed(format!(
                        "idle for {}s",
                        self.idle_timeout.as_secs_f64()
                    ))
                }
                _ = shutdown_signalled(shutdown) => return ReadEnd::Shutdown,
            };

            match frame {
                Some(Ok(StreamFrame::Text(text))) => self.handle_text(&text),
                Some(Ok(StreamFrame::Close(reason))) => {
                    return ReadEnd::Closed(reason.unwrap_or_else(|| "closed by upstream".to_string()))
                }
                Some(Err(e)) if e.is_message_error() => {
                    self.stats.messages_malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(error = %e, "Dropping undecodable frame");
                }
                Some(Err(e)) => return ReadEnd::Closed(e.to_string()),
                None => return ReadEnd::Closed("stream ended".to_string()),
            }
        }
    }

    /// Decode, normalize and publish one frame; a bad frame costs only itself
    fn handle_text(&self, text: &str) {
        let raw = match decode_stream_frame(text, Utc::now()) {
            Ok(Decoded::Price(raw)) => raw,
            Ok(Decoded::Skip) => {
                self.stats.messages_skipped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(bytes = text.len(), "Skipping non-tick frame");
                return;
            }
            Err(e) => {
                self.stats.messages_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, bytes = text.len(), "Dropping malformed frame");
                return;
            }
        };

        match self.normalizer.normalize(&raw) {
            Ok(tick) => {
                self.broadcaster.publish(tick);
                self.stats.ticks_published.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.messages_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "Dropping tick with unusable price");
            }
        }
    }
}

/// Run the recovery snapshot beside the read loop, never in front of it
fn spawn_recovery(recovery: SnapshotFetcher, mut shutdown: watch::Receiver<bool>) {
    tokio::spawn(async move {
        tokio::select! {
            _ = recovery.run() => {}
            _ = shutdown_signalled(&mut shutdown) => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rates::{RateCache, RateTable};
    use crate::upstream::mock::{HangingConnector, MockConnector, MockPriceSource, PendingPriceSource};
    use crate::upstream::PriceEntry;
    use rust_decimal_macros::dec;
    use tokio::time::timeout;

    const DELAY: Duration = Duration::from_secs(5);

    fn rates(source: Arc<MockPriceSource>) -> Arc<RateCache> {
        let table = RateTable::with_rates("USD", [("BRL".to_string(), dec!(5.0))]);
        Arc::new(RateCache::new(source, table, "USDT", &["BRL".to_string()]))
    }

    fn connection(connector: Arc<MockConnector>, broadcaster: &Broadcaster) -> StreamConnection {
        let source = Arc::new(MockPriceSource::replying(vec![]));
        StreamConnection::new(
            connector,
            SymbolSet::new(["BTCUSDT", "ETHUSDT"]).unwrap(),
            TickNormalizer::new(rates(source), "USDT"),
            broadcaster.clone(),
            DELAY,
        )
    }

    fn ticker_frame(symbol: &str, price: &str) -> Result<StreamFrame> {
        Ok(StreamFrame::Text(format!(
            r#"{{"stream":"{}@ticker","data":{{"e":"24hrTicker","s":"{}","c":"{}"}}}}"#,
            symbol.to_lowercase(),
            symbol,
            price
        )))
    }

    async fn wait_for(state: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
        timeout(Duration::from_secs(60), state.wait_for(|s| *s == wanted))
            .await
            .expect("state not reached in time")
            .expect("state sender dropped");
    }

    #[test]
    fn test_stream_url() {
        let connector = BinanceStreamConnector::new("wss://stream.binance.com:9443/");
        let symbols = SymbolSet::new(["BTCUSDT", "ETHUSDT"]).unwrap();
        assert_eq!(
            connector.stream_url(&symbols),
            "wss://stream.binance.com:9443/stream?streams=btcusdt@ticker/ethusdt@ticker"
        );
    }

    #[tokio::test]
    async fn test_live_ticks_are_normalized_and_published() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        let connector = MockConnector::new(0);
        let conn = connection(connector.clone(), &broadcaster);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        let feed = connector.next_feed().await;
        feed.send(ticker_frame("BTCUSDT", "65000.12")).unwrap();

        let tick = timeout(Duration::from_secs(1), subscriber.recv()).await.unwrap().unwrap();
        assert_eq!(tick.symbol, "BTC");
        assert_eq!(tick.price_in("USD"), Some(dec!(65000.12)));
        assert_eq!(tick.price_in("BRL"), Some(dec!(325000.60)));
    }

    #[tokio::test]
    async fn test_bad_frames_do_not_drop_the_connection() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        let connector = MockConnector::new(0);
        let conn = connection(connector.clone(), &broadcaster);
        let stats = conn.stats();
        let mut state = conn.state();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        let feed = connector.next_feed().await;
        feed.send(Ok(StreamFrame::Text("{not json".to_string()))).unwrap();
        feed.send(Ok(StreamFrame::Text(r#"{"result":null,"id":1}"#.to_string()))).unwrap();
        feed.send(ticker_frame("ETHUSDT", "not-a-price")).unwrap();
        feed.send(ticker_frame("ETHUSDT", "3100.5")).unwrap();

        let tick = timeout(Duration::from_secs(1), subscriber.recv()).await.unwrap().unwrap();
        assert_eq!(tick.symbol, "ETH");
        assert_eq!(*state.borrow_and_update(), ConnectionState::Subscribed);
        assert_eq!(connector.attempts(), 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_malformed, 2);
        assert_eq!(snapshot.messages_skipped, 1);
        assert_eq!(snapshot.ticks_published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_fixed_delay_until_subscribed() {
        let broadcaster = Broadcaster::new();
        let connector = MockConnector::new(3);
        let conn = connection(connector.clone(), &broadcaster);
        let mut state = conn.state();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        wait_for(&mut state, ConnectionState::Subscribed).await;

        assert_eq!(connector.attempts(), 4);
        let times = connector.attempt_times();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= DELAY);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upstream_close_triggers_reconnect() {
        let broadcaster = Broadcaster::new();
        let connector = MockConnector::new(0);
        let conn = connection(connector.clone(), &broadcaster);
        let mut state = conn.state();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        let feed = connector.next_feed().await;
        wait_for(&mut state, ConnectionState::Subscribed).await;

        feed.send(Ok(StreamFrame::Close(Some("maintenance".to_string())))).unwrap();
        wait_for(&mut state, ConnectionState::Disconnected).await;

        let _second = connector.next_feed().await;
        wait_for(&mut state, ConnectionState::Subscribed).await;

        assert_eq!(connector.attempts(), 2);
        let times = connector.attempt_times();
        assert!(times[1] - times[0] >= DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_reconnect_delay() {
        let broadcaster = Broadcaster::new();
        let connector = MockConnector::new(usize::MAX);
        let conn = connection(connector.clone(), &broadcaster);
        let mut state = conn.state();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(conn.run(shutdown_rx));

        // First attempt fails, then the connection sits in its reconnect delay
        timeout(Duration::from_secs(60), async {
            while connector.attempts() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        wait_for(&mut state, ConnectionState::Disconnected).await;
        let started = tokio::time::Instant::now();
        shutdown_tx.send(true).unwrap();

        timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
        assert!(tokio::time::Instant::now() - started < DELAY);
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_snapshot_runs_after_reconnect_only() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        let connector = MockConnector::new(0);
        let symbols = SymbolSet::new(["BTCUSDT"]).unwrap();
        let snapshot_source = Arc::new(MockPriceSource::from_fn(|_, _| {
            Ok(vec![PriceEntry::new("BTCUSDT", "64000")])
        }));
        let normalizer = TickNormalizer::new(rates(Arc::new(MockPriceSource::replying(vec![]))), "USDT");
        let recovery = SnapshotFetcher::new(
            snapshot_source.clone(),
            symbols.clone(),
            normalizer.clone(),
            broadcaster.clone(),
        );
        let conn = StreamConnection::new(connector.clone(), symbols, normalizer, broadcaster.clone(), DELAY)
            .with_recovery(recovery);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        let first = connector.next_feed().await;
        assert_eq!(snapshot_source.calls(), 0);

        drop(first);
        let _second = connector.next_feed().await;

        let tick = timeout(Duration::from_secs(10), subscriber.recv()).await.unwrap().unwrap();
        assert_eq!(tick.price_base, dec!(64000));
        assert_eq!(snapshot_source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_connect_is_abandoned_and_retried() {
        let broadcaster = Broadcaster::new();
        let connector = HangingConnector::new();
        let source = Arc::new(MockPriceSource::replying(vec![]));
        let connect_timeout = Duration::from_secs(2);
        let conn = StreamConnection::new(
            connector.clone(),
            SymbolSet::new(["BTCUSDT"]).unwrap(),
            TickNormalizer::new(rates(source), "USDT"),
            broadcaster,
            DELAY,
        )
        .with_timeouts(connect_timeout, Duration::from_secs(30));
        let stats = conn.stats();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        timeout(Duration::from_secs(60), async {
            while connector.attempts() < 3 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connect attempts stopped after a hang");

        let times = connector.attempt_times();
        assert!(times[1] - times[0] >= connect_timeout + DELAY);
        assert_eq!(stats.snapshot().connections, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_stream_is_dropped_after_idle_timeout() {
        let broadcaster = Broadcaster::new();
        let connector = MockConnector::new(0);
        let idle = Duration::from_secs(3);
        let conn = connection(connector.clone(), &broadcaster).with_timeouts(Duration::from_secs(2), idle);
        let mut state = conn.state();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        // Sender stays alive, so only the idle timeout can end this connection
        let _silent = connector.next_feed().await;
        wait_for(&mut state, ConnectionState::Subscribed).await;
        let subscribed_at = tokio::time::Instant::now();

        wait_for(&mut state, ConnectionState::Disconnected).await;
        assert!(tokio::time::Instant::now() - subscribed_at >= idle);

        let _second = connector.next_feed().await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_ticks_flow_while_recovery_snapshot_hangs() {
        let broadcaster = Broadcaster::new();
        let mut subscriber = broadcaster.subscribe();
        let connector = MockConnector::new(0);
        let symbols = SymbolSet::new(["BTCUSDT"]).unwrap();
        let snapshot_source = Arc::new(PendingPriceSource::default());
        let normalizer = TickNormalizer::new(rates(Arc::new(MockPriceSource::replying(vec![]))), "USDT");
        let recovery = SnapshotFetcher::new(
            snapshot_source.clone(),
            symbols.clone(),
            normalizer.clone(),
            broadcaster.clone(),
        );
        let conn = StreamConnection::new(connector.clone(), symbols, normalizer, broadcaster.clone(), DELAY)
            .with_recovery(recovery);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(conn.run(shutdown_rx));

        let first = connector.next_feed().await;
        drop(first);
        let second = connector.next_feed().await;
        second.send(ticker_frame("BTCUSDT", "70000")).unwrap();

        let tick = timeout(Duration::from_secs(10), subscriber.recv()).await.unwrap().unwrap();
        assert_eq!(tick.price_base, dec!(70000));

        timeout(Duration::from_secs(10), async {
            while snapshot_source.calls() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("recovery snapshot never started");
    }
}
