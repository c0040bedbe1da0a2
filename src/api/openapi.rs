use utoipa::OpenApi;

use crate::api::handlers;
use crate::api::responses::*;
use crate::rates::RateCacheStats;
use crate::upstream::{ConnectionState, StreamStatsSnapshot};
use crate::websocket::BroadcastStats;

/// OpenAPI v1 specification
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Market Relay API",
        version = "1.0.0",
        description = "Live crypto prices relayed from the exchange feed and converted into multiple currencies. Streaming clients connect to /ws.",
        license(
            name = "MIT"
        )
    ),
    paths(
        handlers::get_health,
        handlers::get_prices,
        handlers::get_price,
        handlers::get_rates,
        handlers::get_quotes,
    ),
    components(
        schemas(
            HealthResponse,
            ConnectionState,
            StreamStatsSnapshot,
            BroadcastStats,
            RateCacheStats,
            PriceResponse,
            PriceListResponse,
            RatesResponse,
            QuoteItem,
            QuotesResponse,
            ErrorResponse,
        )
    ),
    tags(
        (name = "Health", description = "Relay status"),
        (name = "Prices", description = "Latest prices, conversion rates and on-demand quotes"),
    )
)]
pub struct ApiDocV1;
