use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use super::{
    broadcaster::Broadcaster,
    messages::{ClientMessage, WsMessage},
};
use crate::relay::shutdown_signalled;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket connection state
pub struct WsState {
    pub broadcaster: Broadcaster,
    pub shutdown: watch::Receiver<bool>,
}

/// Per-connection ticker filter; empty means every ticker
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolFilter {
    symbols: BTreeSet<String>,
}

impl SymbolFilter {
    pub fn allows(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(symbol)
    }

    pub fn add<I: IntoIterator<Item = String>>(&mut self, symbols: I) {
        self.symbols
            .extend(symbols.into_iter().map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()));
    }

    pub fn remove<I: IntoIterator<Item = String>>(&mut self, symbols: I) {
        for symbol in symbols {
            self.symbols.remove(&symbol.trim().to_uppercase());
        }
    }

    pub fn symbols(&self) -> Vec<String> {
        self.symbols.iter().cloned().collect()
    }
}

/// Handle WebSocket upgrade request
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriber = state.broadcaster.subscribe();
    let subscriber_id = subscriber.id();
    let mut shutdown = state.shutdown.clone();
    let mut filter = SymbolFilter::default();

    info!(client = %subscriber_id, "WebSocket client connected");

    // Latest known values first, so the client never starts empty
    for tick in state.broadcaster.latest() {
        if !send_message(&mut sender, &WsMessage::from(tick.as_ref())).await {
            state.broadcaster.unsubscribe(subscriber_id);
            return;
        }
    }

    let mut heartbeat = interval(HEARTBEAT_INTERVAL);

    loop {
        select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let replies = handle_client_message(&text, &mut filter, &state.broadcaster);
                        let mut open = true;
                        for reply in &replies {
                            if !send_message(&mut sender, reply).await {
                                open = false;
                                break;
                            }
                        }
                        if !open {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!(client = %subscriber_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(client = %subscriber_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => break,
                    _ => {}
                }
            }

            tick = subscriber.recv() => {
                match tick {
                    Some(tick) => {
                        if filter.allows(&tick.symbol)
                            && !send_message(&mut sender, &WsMessage::from(tick.as_ref())).await
                        {
                            break;
                        }
                    }
                    // Removed from the registry
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                let ping = WsMessage::Ping { timestamp: chrono::Utc::now() };
                if !send_message(&mut sender, &ping).await {
                    break;
                }
            }

            _ = shutdown_signalled(&mut shutdown) => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    state.broadcaster.unsubscribe(subscriber_id);
    info!(client = %subscriber_id, "WebSocket connection closed");
}

/// Apply one client request to the connection's filter and build the replies
fn handle_client_message(
    text: &str,
    filter: &mut SymbolFilter,
    broadcaster: &Broadcaster,
) -> Vec<WsMessage> {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "Invalid client message");
            return vec![WsMessage::Error {
                message: format!("invalid message: {}", e),
            }];
        }
    };

    match client_msg {
        ClientMessage::Subscribe { symbols } => {
            if symbols.is_empty() {
                return vec![WsMessage::Error {
                    message: "subscribe requires at least one symbol".to_string(),
                }];
            }
            filter.add(symbols.clone());

            let mut replies = vec![WsMessage::Subscribed {
                symbols: filter.symbols(),
            }];
            // Current values of the newly requested tickers
            replies.extend(
                symbols
                    .iter()
                    .filter_map(|symbol| broadcaster.latest_for(&symbol.trim().to_uppercase()))
                    .map(|tick| WsMessage::from(tick.as_ref())),
            );
            replies
        }
        ClientMessage::Unsubscribe { symbols } => {
            filter.remove(symbols);
            vec![WsMessage::Unsubscribed {
                symbols: filter.symbols(),
            }]
        }
        ClientMessage::Ping => vec![WsMessage::Pong {
            timestamp: chrono::Utc::now(),
        }],
    }
}

/// Serialize and send; false once the client is gone
async fn send_message(sender: &mut SplitSink<WebSocket, Message>, message: &WsMessage) -> bool {
    match serde_json::to_string(message) {
        Ok(json) => sender.send(Message::Text(json)).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WebSocket message");
            true
        }
    }
}
