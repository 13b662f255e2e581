//! `GET /metrics`
//!
//! Prometheus text exposition. The route only exists when
//! `metrics.enabled` is set; the registry is filled on first mount.

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus::{Encoder, TextEncoder};

use crate::AppState;
use crate::config::MetricsConfig;
use crate::metrics::{PENDING_TOKENS, REGISTRY, init_metrics};

/// Scrape handler
///
/// `healthdash_pending_tokens` is sampled here, at scrape time.
async fn scrape(State(state): State<AppState>) -> Response {
    let pending = state.tokens.len().await;
    PENDING_TOKENS.set(i64::try_from(pending).unwrap_or(i64::MAX));

    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&REGISTRY.gather()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoder.format_type().to_string())],
            body,
        )
            .into_response(),
        Err(error) => {
            tracing::error!(%error, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}

/// Router exposing `/metrics`, or an empty router when disabled
pub fn metrics_router(config: &MetricsConfig) -> Router<AppState> {
    if !config.enabled {
        return Router::new();
    }

    init_metrics();
    Router::new().route("/metrics", get(scrape))
}
