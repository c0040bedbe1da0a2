//! Error types for the relay
//!
//! Every fallible relay operation returns [`RelayError`]. Most variants are
//! transient and handled where they occur (the stream reconnects, the rate
//! cache keeps its previous table); only `Config` is fatal, at startup.

use thiserror::Error;

/// Errors that can occur while running the relay
///
/// # Error Categories
///
/// - **Startup Errors**: `Config`
/// - **Transient Network Errors**: `Http`, `WebSocket`, `Upstream`
/// - **Message Errors**: `Decode`, `InvalidPrice`
#[derive(Debug, Error)]
pub enum RelayError {
    /// Static configuration is missing or invalid; the relay refuses to start
    #[error("Configuration error: {0}")]
    Config(String),

    /// A request/response call to the upstream REST API failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream WebSocket connection failed or was closed with an error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// An upstream payload was not valid JSON
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A price field was present but not a usable number
    #[error("Invalid price for {symbol}: {value}")]
    InvalidPrice { symbol: String, value: String },

    /// The upstream answered, but not with what was asked for
    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl RelayError {
    /// Returns true if this error should only cost the current message,
    /// not the connection it arrived on
    pub fn is_message_error(&self) -> bool {
        matches!(self, RelayError::Decode(_) | RelayError::InvalidPrice { .. })
    }

    /// Returns true if the failed operation is worth retrying later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::Http(_) | RelayError::WebSocket(_) | RelayError::Upstream(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
