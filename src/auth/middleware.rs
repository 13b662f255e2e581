//! Authentication middleware
//!
//! Protects routes that require authentication.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};

use super::session::Session;
use crate::AppState;
use crate::error::AppError;

/// Identity attached by [`require_auth`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    /// Email from the session, absent for bearer-only requests
    pub email: Option<String>,
    /// Session access token, else the bearer token
    pub access_token: Option<String>,
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
}

/// Resolve the identity of a request
///
/// The session wins; an `Authorization: Bearer` header is the fallback.
pub fn identify(session: &Session, headers: &HeaderMap) -> Option<CurrentUser> {
    let bearer = extract_bearer_token(headers);

    if let Some(email) = &session.email {
        return Some(CurrentUser {
            email: Some(email.clone()),
            access_token: session.oneup_access_token.clone().or(bearer),
        });
    }

    bearer.map(|token| CurrentUser {
        email: None,
        access_token: Some(token),
    })
}

/// Middleware to require authentication
///
/// Reads the session decoded by the session layer, falls back to a bearer
/// token, and redirects to `auth.login_path` when neither identifies the
/// caller. Adds [`CurrentUser`] to request extensions if valid.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/dashboard", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_auth));
/// ```
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = request
        .extensions()
        .get::<Session>()
        .cloned()
        .unwrap_or_default();

    match identify(&session, request.headers()) {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => {
            tracing::debug!(path = %request.uri().path(), "Anonymous request redirected to login");
            Redirect::to(&state.config.auth.login_path).into_response()
        }
    }
}

/// Extractor for current authenticated user
///
/// Use in handlers behind [`require_auth`].
#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}
