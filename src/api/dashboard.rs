//! Dashboard data API
//!
//! Bundles the 1upHealth FHIR calls on the backend and serves them to the
//! dashboard page as one JSON document.

use axum::{Json, Router, extract::State, middleware, routing::get};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::AppState;
use crate::auth::{CurrentUser, require_auth};
use crate::error::AppError;

/// Create dashboard API router
///
/// Routes:
/// - GET /api/dashboard (auth required)
pub fn dashboard_api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/dashboard", get(dashboard_resources))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

/// Response of GET /api/dashboard
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    /// Access token the resources were fetched with
    pub token: String,
    /// Bundles keyed by FHIR resource type
    pub resources: Map<String, Value>,
}

/// GET /api/dashboard
///
/// Uses the session access token, else the bearer token. A caller
/// identified by session email alone has nothing to fetch with (401).
async fn dashboard_resources(
    State(state): State<AppState>,
    user: CurrentUser,
) -> Result<Json<DashboardResponse>, AppError> {
    let token = user.access_token.ok_or(AppError::Unauthorized)?;

    let resources = state.oneup.get_all_fhir_resource_bundles(&token).await?;

    Ok(Json(DashboardResponse { token, resources }))
}
