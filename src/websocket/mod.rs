pub mod messages;
pub mod broadcaster;
pub mod handler;

pub use messages::{ClientMessage, WsMessage};
pub use broadcaster::{BroadcastStats, Broadcaster, PublishOutcome, Subscriber};
pub use handler::{websocket_handler, SymbolFilter, WsState};
