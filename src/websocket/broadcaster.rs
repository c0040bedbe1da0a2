use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::market_data::Tick;

const DEFAULT_CAPACITY: usize = 256;

/// Broadcast statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BroadcastStats {
    pub subscribers: usize,
    pub ticks_published: u64,
    /// Successful enqueues across all subscribers
    pub deliveries: u64,
    /// Ticks dropped for a subscriber whose queue was full
    pub drops: u64,
}

/// Result of a single publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// A registered downstream sink
///
/// Receives ticks in publish order. Dropping it closes the queue; the
/// broadcaster prunes it on the next publish.
pub struct Subscriber {
    id: Uuid,
    receiver: mpsc::Receiver<Arc<Tick>>,
}

impl Subscriber {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Arc<Tick>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Tick>> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    deliveries: AtomicU64,
    drops: AtomicU64,
}

/// Fan-out point for normalized ticks
///
/// Each subscriber owns a bounded queue. `publish` never waits: a full queue
/// loses that tick for that subscriber only (drop-newest).
#[derive(Clone)]
pub struct Broadcaster {
    subscribers: Arc<DashMap<Uuid, mpsc::Sender<Arc<Tick>>>>,
    /// Most recent tick per symbol
    latest: Arc<DashMap<String, Arc<Tick>>>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl Broadcaster {
    /// Create a new broadcaster with the default per-subscriber capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new broadcaster with a custom per-subscriber capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            latest: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);

        tracing::debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber registered");

        Subscriber { id, receiver: rx }
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            tracing::debug!(subscriber = %id, total = self.subscribers.len(), "Subscriber removed");
        }
        removed
    }

    /// Deliver a tick to every subscriber without waiting on any of them
    pub fn publish(&self, tick: Tick) -> PublishOutcome {
        let tick = Arc::new(tick);
        self.remember(&tick);

        let mut outcome = PublishOutcome::default();
        let mut closed = Vec::new();

        for entry in self.subscribers.iter() {
            match entry.value().try_send(Arc::clone(&tick)) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => outcome.dropped += 1,
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        // Removing while iterating would deadlock on the shard lock
        for id in closed {
            if self.subscribers.remove(&id).is_some() {
                tracing::debug!(subscriber = %id, "Pruned closed subscriber");
            }
        }

        if outcome.dropped > 0 {
            tracing::debug!(symbol = %tick.symbol, dropped = outcome.dropped, "Subscriber queues full");
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .deliveries
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.counters
            .drops
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);

        outcome
    }

    fn remember(&self, tick: &Arc<Tick>) {
        self.latest.insert(tick.symbol.clone(), Arc::clone(tick));
    }

    /// Latest tick of every symbol seen so far, ordered by symbol
    pub fn latest(&self) -> Vec<Arc<Tick>> {
        let mut ticks: Vec<Arc<Tick>> = self
            .latest
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        ticks.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        ticks
    }

    pub fn latest_for(&self, symbol: &str) -> Option<Arc<Tick>> {
        self.latest.get(symbol).map(|entry| Arc::clone(entry.value()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscribers.len(),
            ticks_published: self.counters.published.load(Ordering::Relaxed),
            deliveries: self.counters.deliveries.load(Ordering::Relaxed),
            drops: self.counters.drops.load(Ordering::Relaxed),
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
