//! In-memory upstreams for tests

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::client::PriceSource;
use super::messages::PriceEntry;
use super::stream::{FrameStream, StreamConnector, StreamFrame};
use crate::error::{RelayError, Result};
use crate::market_data::SymbolSet;

type Reply = std::result::Result<Vec<PriceEntry>, String>;
type ReplyFn = dyn Fn(usize, &[String]) -> Reply + Send + Sync;

/// Price source answering from a closure of (call index, requested symbols)
pub struct MockPriceSource {
    reply: Box<ReplyFn>,
    quotes: HashMap<String, String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl MockPriceSource {
    pub fn from_fn<F>(reply: F) -> Self
    where
        F: Fn(usize, &[String]) -> Reply + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            quotes: HashMap::new(),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies in order; once exhausted every call fails
    pub fn replying(replies: Vec<Reply>) -> Self {
        Self::from_fn(move |call, _| {
            replies
                .get(call)
                .cloned()
                .unwrap_or_else(|| Err("no more replies".to_string()))
        })
    }

    /// Single-symbol quotes served by `fetch_price`
    pub fn with_quotes(mut self, quotes: &[(&str, &str)]) -> Self {
        self.quotes = quotes
            .iter()
            .map(|(symbol, price)| (symbol.to_string(), price.to_string()))
            .collect();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn fetch_prices(&self, symbols: &[String]) -> Result<Vec<PriceEntry>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(symbols.to_vec());
        (self.reply)(call, symbols).map_err(RelayError::Upstream)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<PriceEntry> {
        self.quotes
            .get(symbol)
            .map(|price| PriceEntry::new(symbol, price))
            .ok_or_else(|| RelayError::Upstream(format!("invalid symbol {}", symbol)))
    }
}

/// Stream connector that fails the first `failures` attempts, then hands out
/// streams fed by the test through [`MockConnector::next_feed`]
pub struct MockConnector {
    failures: usize,
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<tokio::time::Instant>>,
    feeds: Mutex<Vec<mpsc::UnboundedSender<Result<StreamFrame>>>>,
    feed_ready: tokio::sync::Notify,
}

impl MockConnector {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            attempts: AtomicUsize::new(0),
            attempt_times: Mutex::new(Vec::new()),
            feeds: Mutex::new(Vec::new()),
            feed_ready: tokio::sync::Notify::new(),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempt_times.lock().clone()
    }

    /// Wait for the next successful connection and return its feed
    pub async fn next_feed(&self) -> mpsc::UnboundedSender<Result<StreamFrame>> {
        loop {
            let notified = self.feed_ready.notified();
            if let Some(feed) = self.feeds.lock().pop() {
                return feed;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn connect(&self, _symbols: &SymbolSet) -> Result<FrameStream> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(tokio::time::Instant::now());

        if attempt < self.failures {
            return Err(RelayError::Upstream(format!("refused attempt {}", attempt + 1)));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().push(tx);
        self.feed_ready.notify_one();
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

/// Connector whose connect attempts never complete
#[derive(Default)]
pub struct HangingConnector {
    attempts: AtomicUsize,
    attempt_times: Mutex<Vec<tokio::time::Instant>>,
}

impl HangingConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempt_times(&self) -> Vec<tokio::time::Instant> {
        self.attempt_times.lock().clone()
    }
}

#[async_trait]
impl StreamConnector for HangingConnector {
    async fn connect(&self, _symbols: &SymbolSet) -> Result<FrameStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.attempt_times.lock().push(tokio::time::Instant::now());
        std::future::pending().await
    }
}

/// Price source whose requests never answer
#[derive(Default)]
pub struct PendingPriceSource {
    calls: AtomicUsize,
}

impl PendingPriceSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceSource for PendingPriceSource {
    async fn fetch_prices(&self, _symbols: &[String]) -> Result<Vec<PriceEntry>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }

    async fn fetch_price(&self, _symbol: &str) -> Result<PriceEntry> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}
