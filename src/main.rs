use market_relay::{create_router, Relay, RelayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset
const DEFAULT_LOG_FILTER: &str = "market_relay=info";

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration errors are fatal: the relay refuses to start
    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    let relay = match Relay::from_config(config.clone()) {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!("❌ Failed to build relay: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("📡 Symbols: {}", config.symbols.join(", "));
    tracing::info!(
        "💱 Currencies: {} -> {}",
        config.base_currency,
        config.target_currencies.join(", ")
    );

    // Start rate refresh, startup snapshot and upstream stream
    let handle = relay.start();

    let app = create_router(handle.api_state(), handle.ws_state());

    let listener = match tokio::net::TcpListener::bind(config.bind_addr.as_str()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("❌ Failed to bind {}: {}", config.bind_addr, e);
            handle.shutdown().await;
            std::process::exit(1);
        }
    };

    let addr = &config.bind_addr;
    tracing::info!("🚀 Market relay running on http://{}", addr);
    tracing::info!("📊 Health check: http://{}/api/v1/health", addr);
    tracing::info!("📚 Swagger UI: http://{}/swagger-ui", addr);
    tracing::info!("🔌 WebSocket: ws://{}/ws", addr);
    tracing::info!(r#"   {{"action":"subscribe","symbols":["BTC","ETH"]}}"#);

    // Stop accepting requests on Ctrl-C, then stop the relay (open WebSockets close on its signal)
    let serve = axum::serve(listener, app).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("🛑 Shutdown requested");
    });

    if let Err(e) = serve.await {
        tracing::error!("❌ Server error: {}", e);
    }

    handle.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter_targets_this_crate_only() {
        assert!(tracing_subscriber::EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
        for directive in DEFAULT_LOG_FILTER.split(',') {
            let target = directive.split('=').next().unwrap_or_default();
            assert_eq!(target, env!("CARGO_CRATE_NAME"));
        }
    }
}
