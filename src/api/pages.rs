//! Page routes
//!
//! - GET / (auth required)
//! - GET /dashboard (auth required)
//! - everything else falls back to path-based page resolution

use axum::{
    Router,
    extract::State,
    http::{StatusCode, Uri},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};

use crate::AppState;
use crate::auth::{CurrentUser, require_auth};
use crate::pages::{Page, PageContext};

/// Create gated page router
pub fn pages_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/dashboard", get(dashboard))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn context_for(user: CurrentUser) -> PageContext {
    PageContext { email: user.email }
}

/// GET /
async fn index(State(state): State<AppState>, user: CurrentUser) -> Html<String> {
    state.pages.render(Page::Index, &context_for(user))
}

/// GET /dashboard
async fn dashboard(State(state): State<AppState>, user: CurrentUser) -> Html<String> {
    state.pages.render(Page::Dashboard, &context_for(user))
}

/// Fallback for every unrouted, unproxied path
///
/// Renders the page resolved from the path, or the 404 page.
pub async fn page_fallback(State(state): State<AppState>, uri: Uri) -> Response {
    match state.pages.resolve(uri.path()) {
        Some(page) => state.pages.render(page, &PageContext::default()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            state.pages.render(Page::NotFound, &PageContext::default()),
        )
            .into_response(),
    }
}
