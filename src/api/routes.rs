use axum::{routing::get, Router};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::websocket::{websocket_handler, WsState};

use super::handlers::*;
use super::openapi::ApiDocV1;

/// Create the API router with Swagger UI and WebSocket support
pub fn create_router(state: AppState, ws_state: Arc<WsState>) -> Router {
    Router::new()
        // Swagger UI
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/v1/openapi.json", ApiDocV1::openapi()))
        // WebSocket endpoint
        .route("/ws", get(websocket_handler))
        .with_state(ws_state)
        // Health
        .route("/api/v1/health", get(get_health))
        // Prices and rates
        .route("/api/v1/prices", get(get_prices))
        .route("/api/v1/prices/:symbol", get(get_price))
        .route("/api/v1/rates", get(get_rates))
        .route("/api/v1/quotes", get(get_quotes))
        .with_state(state)
}
