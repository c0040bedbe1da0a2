//! Upstream exchange integration
//!
//! - [`client`]: batched request/response price lookups (snapshots, rates, quotes)
//! - [`messages`]: wire types and defensive decoding of stream frames
//! - [`stream`]: the long-lived multiplexed subscription with fixed-delay reconnect
//! - [`snapshot`]: one-shot seeding of subscribers from a price snapshot

pub mod client;
pub mod messages;
pub mod snapshot;
pub mod stream;

#[cfg(test)]
pub(crate) mod mock;

pub use client::{BinanceRestClient, PriceSource};
pub use messages::{decode_stream_frame, Decoded, PriceEntry, PriceField};
pub use snapshot::SnapshotFetcher;
pub use stream::{
    BinanceStreamConnector, ConnectionState, FrameStream, StreamConnection, StreamConnector,
    StreamFrame, StreamStats, StreamStatsSnapshot,
};
