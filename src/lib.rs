//! HealthDash - passwordless login in front of the 1upHealth API
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Upstream proxy (outermost)                  │
//! │  - proxy.paths prefixes forwarded to baseURL                │
//! │  - CF-Access-Client-Id / CF-Access-Client-Secret injected   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Session & token accept                     │
//! │  - demoappsession cookie decoded / re-encoded               │
//! │  - ?token= consumed, redirect to /dashboard                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Routes (Axum)                              │
//! │  - /sendtoken, /callback, /logout                           │
//! │  - /, /dashboard, /api/dashboard behind the auth gate       │
//! │  - page fallback                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - `api`: page and dashboard handlers
//! - `auth`: sessions, passwordless tokens, auth gate
//! - `proxy`: upstream pass-through
//! - `oneup`: FHIR bundle aggregation
//! - `pages`: HTML rendering
//! - `config`: Configuration management
//! - `error`: Error types

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod oneup;
pub mod pages;
pub mod proxy;

use std::sync::Arc;

/// Maximum body accepted by local routes
const LOCAL_BODY_LIMIT: usize = 64 * 1024;

/// Application state shared across all handlers
///
/// Everything except the pending token table is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<config::AppConfig>,

    /// Pending passwordless tokens
    pub tokens: Arc<auth::TokenStore>,

    /// Where issued tokens are sent
    pub delivery: Arc<dyn auth::TokenDelivery>,

    /// HTML renderer
    pub pages: Arc<pages::PageRenderer>,

    /// FHIR aggregation client
    pub oneup: Arc<oneup::OneUpClient>,

    /// HTTP client for upstream calls
    pub http_client: Arc<reqwest::Client>,
}

impl AppState {
    /// Initialize application state with the log-only token delivery
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: config::AppConfig) -> Result<Self, error::AppError> {
        let reveal_link = config.mode == config::RunMode::Development;
        Self::with_delivery(config, Arc::new(auth::LogDelivery::new(reveal_link)))
    }

    /// Initialize application state with a custom token delivery
    pub fn with_delivery(
        config: config::AppConfig,
        delivery: Arc<dyn auth::TokenDelivery>,
    ) -> Result<Self, error::AppError> {
        tracing::info!("Initializing application state...");

        // Redirects are passed back to the caller, not followed
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("HealthDash/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(config.upstream.timeout_seconds))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| error::AppError::Internal(e.into()))?;
        let http_client = Arc::new(http_client);

        let oneup = oneup::OneUpClient::new(http_client.clone(), &config.base_url, &config.oneup);
        let pages = pages::PageRenderer::new(&config);
        let token_ttl = chrono::Duration::try_seconds(config.auth.token_ttl_seconds).ok_or_else(|| {
            error::AppError::Config("auth.token_ttl_seconds is out of range".to_string())
        })?;
        let tokens = auth::TokenStore::new(token_ttl);

        tracing::info!(
            base_url = %config.base_url,
            mode = config.mode.as_str(),
            "Application state initialized successfully"
        );

        Ok(Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            delivery,
            pages: Arc::new(pages),
            oneup: Arc::new(oneup),
            http_client,
        })
    }
}

/// Build the Axum router with all routes.
///
/// This is shared by the binary and integration tests to keep route
/// composition consistent across environments.
///
/// Layer order, outermost first: trace, upstream proxy, request metrics,
/// session, token accept. The proxy therefore sees requests before any
/// session or auth handling.
pub fn build_router(state: AppState) -> axum::Router {
    use axum::{Router, middleware};
    use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

    Router::new()
        .merge(auth::passwordless_router(state.clone()))
        .merge(api::pages_router(state.clone()))
        .merge(api::dashboard_api_router(state.clone()))
        .merge(api::metrics_router(&state.config.metrics))
        .fallback(api::page_fallback)
        .layer(RequestBodyLimitLayer::new(LOCAL_BODY_LIMIT))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::accept_token,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::session_layer,
        ))
        .layer(middleware::from_fn(record_request))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            proxy::proxy_upstream,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn record_request(
    request: axum::extract::Request,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let response = next.run(request).await;

    metrics::HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();

    response
}
