//! HealthDash binary entry point

use healthdash::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Load `.env`
/// 2. Initialize tracing/logging
/// 3. Load configuration from file and environment
/// 4. Initialize AppState
/// 5. Build Axum router
/// 6. Start HTTP server
///
/// Any startup failure is returned from `main`, which prints it to stderr
/// and exits with status 1.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    // 2. Initialize tracing/logging
    let production = std::env::var("NODE_ENV").is_ok_and(|env| env == "production");
    let log_format = std::env::var("HEALTHDASH__LOGGING__FORMAT")
        .unwrap_or_else(|_| if production { "json" } else { "pretty" }.to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "healthdash=info,tower_http=debug".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting HealthDash...");

    // 3. Load configuration
    let config = config::AppConfig::load()
        .inspect_err(|error| tracing::error!(%error, "Failed to load configuration"))?;
    tracing::info!(
        base_url = %config.base_url,
        mode = config.mode.as_str(),
        proxy_paths = ?config.proxy.paths,
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone())
        .inspect_err(|error| tracing::error!(%error, "Failed to initialize application state"))?;

    // 5. Build Axum router
    let app = healthdash::build_router(state);

    // 6. Start HTTP server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .inspect_err(|error| tracing::error!(%error, addr = %addr, "Failed to bind"))?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("> Ready on \"{}\"", config.base_url);

    axum::serve(listener, app).await?;

    Ok(())
}
