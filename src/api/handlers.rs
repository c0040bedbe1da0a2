use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::error::RelayError;
use crate::rates::RateCache;
use crate::upstream::{ConnectionState, PriceSource, StreamStats};
use crate::websocket::Broadcaster;

use super::responses::*;

/// Everything the REST handlers read from the running relay
pub struct ApiState {
    pub broadcaster: Broadcaster,
    pub rates: Arc<RateCache>,
    pub source: Arc<dyn PriceSource>,
    pub upstream: watch::Receiver<ConnectionState>,
    pub stream_stats: Arc<StreamStats>,
    pub started_at: DateTime<Utc>,
}

/// Most tickers one quotes request may ask for
pub const MAX_QUOTE_SYMBOLS: usize = 20;

/// Upstream quote requests in flight per quotes call
const QUOTE_CONCURRENCY: usize = 4;

/// Shared application state
pub type AppState = Arc<ApiState>;

/// REST error
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),
}

/// Convert ApiError to HTTP response
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

/// Relay health
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "Health",
    responses(
        (status = 200, description = "Relay status", body = HealthResponse)
    )
)]
pub async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let upstream = *state.upstream.borrow();
    let status = if upstream == ConnectionState::Subscribed {
        "healthy"
    } else {
        "degraded"
    };
    let now = Utc::now();

    Json(HealthResponse {
        status: status.to_string(),
        upstream,
        stream: state.stream_stats.snapshot(),
        broadcast: state.broadcaster.stats(),
        rates: state.rates.stats(),
        current_rates: state.rates.get().to_map(),
        uptime_secs: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}

/// Latest price of every ticker
#[utoipa::path(
    get,
    path = "/api/v1/prices",
    tag = "Prices",
    responses(
        (status = 200, description = "Latest prices", body = PriceListResponse)
    )
)]
pub async fn get_prices(State(state): State<AppState>) -> Json<PriceListResponse> {
    let prices: Vec<PriceResponse> = state
        .broadcaster
        .latest()
        .iter()
        .map(|tick| PriceResponse::from(tick.as_ref()))
        .collect();

    Json(PriceListResponse {
        count: prices.len(),
        prices,
    })
}

/// Latest price of one ticker
#[utoipa::path(
    get,
    path = "/api/v1/prices/{symbol}",
    tag = "Prices",
    params(
        ("symbol" = String, Path, description = "Ticker, e.g. BTC")
    ),
    responses(
        (status = 200, description = "Latest price", body = PriceResponse),
        (status = 404, description = "No price seen yet", body = ErrorResponse)
    )
)]
pub async fn get_price(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<PriceResponse>, ApiError> {
    let symbol = symbol.to_uppercase();
    state
        .broadcaster
        .latest_for(&symbol)
        .map(|tick| Json(PriceResponse::from(tick.as_ref())))
        .ok_or_else(|| ApiError::NotFound(format!("no price for {}", symbol)))
}

/// Current conversion rates
#[utoipa::path(
    get,
    path = "/api/v1/rates",
    tag = "Prices",
    responses(
        (status = 200, description = "Current rate table", body = RatesResponse)
    )
)]
pub async fn get_rates(State(state): State<AppState>) -> Json<RatesResponse> {
    Json(RatesResponse::from(state.rates.get().as_ref()))
}

/// On-demand quotes straight from upstream
///
/// Each ticker is quoted as the `<SYMBOL><CONVERT>` pair with its own request.
/// A pair upstream does not list becomes an error entry, not a failed call.
#[utoipa::path(
    get,
    path = "/api/v1/quotes",
    tag = "Prices",
    params(QuoteQuery),
    responses(
        (status = 200, description = "Quotes, one entry per ticker", body = QuotesResponse),
        (status = 400, description = "Missing parameter or too many tickers", body = ErrorResponse)
    )
)]
pub async fn get_quotes(
    State(state): State<AppState>,
    Query(query): Query<QuoteQuery>,
) -> Result<Json<QuotesResponse>, ApiError> {
    let symbols: Vec<String> = query
        .symbols
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    let convert = query
        .convert
        .as_deref()
        .unwrap_or_default()
        .trim()
        .to_uppercase();

    if symbols.is_empty() || convert.is_empty() {
        return Err(ApiError::BadRequest(
            "parameters 'symbols' and 'convert' are required".to_string(),
        ));
    }

    if symbols.len() > MAX_QUOTE_SYMBOLS {
        return Err(ApiError::BadRequest(format!(
            "at most {} symbols per request, got {}",
            MAX_QUOTE_SYMBOLS,
            symbols.len()
        )));
    }

    let quotes: Vec<QuoteItem> = stream::iter(symbols)
        .map(|symbol| quote_pair(state.source.as_ref(), symbol, &convert))
        .buffered(QUOTE_CONCURRENCY)
        .collect()
        .await;

    Ok(Json(QuotesResponse {
        convert,
        quotes,
        timestamp: Utc::now(),
    }))
}

async fn quote_pair(source: &dyn PriceSource, symbol: String, convert: &str) -> QuoteItem {
    let pair = format!("{}{}", symbol, convert);

    let price = source.fetch_price(&pair).await.and_then(|entry| {
        let text = entry.price.as_text();
        Decimal::from_str(text.trim()).map_err(|_| RelayError::InvalidPrice {
            symbol: pair.clone(),
            value: text,
        })
    });

    match price {
        Ok(price) => QuoteItem {
            symbol,
            pair,
            price: Some(price),
            error: None,
        },
        Err(e) => {
            tracing::debug!(pair = %pair, error = %e, "Quote unavailable");
            QuoteItem {
                error: Some(format!("pair {}/{} not available", symbol, convert)),
                symbol,
                pair,
                price: None,
            }
        }
    }
}
