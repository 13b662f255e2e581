//! Passwordless email login
//!
//! Implements the token flow:
//! 1. `POST /sendtoken` issues a single-use token for an email address
//! 2. The token is handed to a [`TokenDelivery`] (email, log, ...)
//! 3. Any request carrying `?token=` is intercepted by [`accept_token`],
//!    which consumes the token, authenticates the session and redirects

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Form, Json, Router,
    extract::{FromRequest, Query, Request, State},
    http::header::CONTENT_TYPE,
    middleware::{self, Next},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::middleware::require_auth;
use super::session::{Session, SessionUpdate};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::{TOKENS_ACCEPTED_TOTAL, TOKENS_ISSUED_TOTAL};

/// Create passwordless router
///
/// Routes:
/// - POST /sendtoken - Issue a login token
/// - GET /callback - Landing route for emailed links (auth required)
/// - GET /logout - Clear session, redirect to login
/// - POST /logout - Clear session, respond "ok"
pub fn passwordless_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/callback",
            get(callback).route_layer(middleware::from_fn_with_state(state, require_auth)),
        )
        .route("/sendtoken", post(send_token))
        .route("/logout", get(logout_redirect).post(logout))
}

// =============================================================================
// Token store
// =============================================================================

/// Pending token entry
#[derive(Debug, Clone)]
struct PendingToken {
    email: String,
    expires_at: DateTime<Utc>,
}

impl PendingToken {
    fn is_valid(&self) -> bool {
        self.expires_at > Utc::now()
    }
}

/// Pending single-use tokens
///
/// Keyed by the SHA-256 digest of the token so raw tokens never sit in
/// memory longer than the request that issued them.
pub struct TokenStore {
    entries: Arc<RwLock<HashMap<String, PendingToken>>>,
    ttl: Duration,
}

fn digest(token: &str) -> String {
    use base64::{Engine as _, engine::general_purpose};
    use sha2::{Digest, Sha256};

    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn generate_token() -> String {
    use base64::{Engine as _, engine::general_purpose};
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

impl TokenStore {
    /// Create a store whose tokens live for `ttl`
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Issue a token for `email`
    ///
    /// Prunes expired entries first. Earlier tokens for the same email stay
    /// valid until used or expired.
    pub async fn issue(&self, email: &str) -> String {
        let token = generate_token();
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid());
        let removed = before - entries.len();
        if removed > 0 {
            tracing::debug!(removed, "Pruned expired login tokens");
        }

        entries.insert(
            digest(&token),
            PendingToken {
                email: email.to_string(),
                expires_at: Utc::now()
                    .checked_add_signed(self.ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );

        token
    }

    /// Consume a token, returning its email
    ///
    /// When `uid` is given it must match the token's email; a mismatch
    /// leaves the token in place.
    pub async fn consume(&self, token: &str, uid: Option<&str>) -> Option<String> {
        let key = digest(token);
        let mut entries = self.entries.write().await;

        let entry = entries.get(&key)?;
        if !entry.is_valid() {
            entries.remove(&key);
            return None;
        }
        if uid.is_some_and(|uid| uid != entry.email) {
            return None;
        }

        entries.remove(&key).map(|entry| entry.email)
    }

    /// Number of pending tokens, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// =============================================================================
// Delivery
// =============================================================================

/// Hands an issued token to the user
#[async_trait]
pub trait TokenDelivery: Send + Sync {
    /// Deliver `token` to `email`; `callback_url` is the ready-made link
    async fn deliver(&self, email: &str, token: &str, callback_url: &str) -> anyhow::Result<()>;
}

/// Delivery that only accepts the address
///
/// Nothing is sent. In development the login link is logged so the flow
/// can be completed by hand.
pub struct LogDelivery {
    reveal_link: bool,
}

impl LogDelivery {
    pub fn new(reveal_link: bool) -> Self {
        Self { reveal_link }
    }
}

#[async_trait]
impl TokenDelivery for LogDelivery {
    async fn deliver(&self, email: &str, _token: &str, callback_url: &str) -> anyhow::Result<()> {
        if self.reveal_link {
            tracing::info!(email = %email, link = %callback_url, "Login link issued");
        } else {
            tracing::debug!(email = %email, "Login token issued");
        }
        Ok(())
    }
}

/// Build `<public_url>/callback?token=..&uid=..`
pub fn callback_url(public_url: &str, token: &str, email: &str) -> String {
    format!(
        "{}/callback?token={}&uid={}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(token),
        urlencoding::encode(email)
    )
}

/// Loose syntactic email check
///
/// Single-label domains (`user@localhost`) are accepted; empty domain
/// labels are not.
pub fn is_valid_email(email: &str) -> bool {
    if email.len() > 254 || email.chars().any(char::is_whitespace) {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    !local.is_empty() && !domain.contains('@') && domain.split('.').all(|label| !label.is_empty())
}

// =============================================================================
// Request token
// =============================================================================

/// Body of POST /sendtoken
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    #[serde(alias = "email")]
    pub user: Option<String>,
}

/// JSON or form-urlencoded [`TokenRequest`]
pub struct TokenRequestBody(pub TokenRequest);

#[async_trait]
impl<S> FromRequest<S> for TokenRequestBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));

        if is_json {
            let Json(body) = Json::<TokenRequest>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
            Ok(Self(body))
        } else {
            let Form(body) = Form::<TokenRequest>::from_request(req, state)
                .await
                .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
            Ok(Self(body))
        }
    }
}

/// POST /sendtoken
///
/// Responds `"ok"` for any valid address, whether or not delivery worked.
async fn send_token(
    State(state): State<AppState>,
    TokenRequestBody(body): TokenRequestBody,
) -> Result<Json<&'static str>, AppError> {
    let email = body
        .user
        .as_deref()
        .map(str::trim)
        .filter(|email| is_valid_email(email))
        .ok_or_else(|| AppError::Validation("A valid email address is required".to_string()))?;

    let token = state.tokens.issue(email).await;
    TOKENS_ISSUED_TOTAL.inc();

    let link = callback_url(&state.config.server.public_url, &token, email);
    if let Err(error) = state.delivery.deliver(email, &token, &link).await {
        tracing::warn!(email = %email, error = %error, "Token delivery failed");
    }

    Ok(Json("ok"))
}

// =============================================================================
// Accept token
// =============================================================================

/// Query parameters read by [`accept_token`]
#[derive(Debug, Deserialize)]
struct AcceptQuery {
    token: Option<String>,
    uid: Option<String>,
}

/// Middleware accepting `?token=` on any route
///
/// Must run inside [`super::session::session_layer`]. A valid token
/// authenticates the session and redirects to `auth.success_redirect`;
/// anything else passes through untouched.
pub async fn accept_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Ok(Query(query)) = Query::<AcceptQuery>::try_from_uri(request.uri()) else {
        return next.run(request).await;
    };
    let Some(token) = query.token.filter(|token| !token.is_empty()) else {
        return next.run(request).await;
    };

    let Some(email) = state.tokens.consume(&token, query.uid.as_deref()).await else {
        tracing::debug!("Ignoring invalid or expired login token");
        return next.run(request).await;
    };

    TOKENS_ACCEPTED_TOTAL.inc();
    tracing::info!(email = %email, "Login token accepted");

    let mut session = request
        .extensions()
        .get::<Session>()
        .cloned()
        .unwrap_or_default();
    session.email = Some(email);

    let mut response = Redirect::to(&state.config.auth.success_redirect).into_response();
    response
        .extensions_mut()
        .insert(SessionUpdate::Set(session));
    response
}

// =============================================================================
// Callback & logout
// =============================================================================

/// GET /callback
async fn callback(State(state): State<AppState>) -> Redirect {
    Redirect::to(&state.config.auth.success_redirect)
}

/// GET /logout
///
/// Clears session cookie and redirects to login.
async fn logout_redirect(State(state): State<AppState>) -> Response {
    let mut response = Redirect::to(&state.config.auth.login_path).into_response();
    response.extensions_mut().insert(SessionUpdate::Clear);
    response
}

/// POST /logout
///
/// Clears session cookie and responds `"ok"`.
async fn logout() -> Response {
    let mut response = Json("ok").into_response();
    response.extensions_mut().insert(SessionUpdate::Clear);
    response
}
