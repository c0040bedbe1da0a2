// Library Crate Root
// lib.rs

pub mod api;
pub mod config;
pub mod error;
pub mod market_data;
pub mod rates;
pub mod relay;
pub mod upstream;
pub mod websocket;

// pub use = re-export at crate root
pub use api::{create_router, AppState};
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use market_data::{RawPrice, SymbolSet, Tick, TickNormalizer};
pub use rates::{RateCache, RateTable};
pub use relay::{Relay, RelayHandle};
pub use upstream::{ConnectionState, PriceSource, StreamConnection, StreamConnector};
pub use websocket::Broadcaster;
