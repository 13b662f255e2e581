//! Session management
//!
//! Uses HMAC-signed values stored in the `demoappsession` cookie.
//! No server-side session storage needed.
//!
//! The session is decoded once per request by [`session_layer`] and
//! re-encoded on the way out when a handler attached a [`SessionUpdate`].

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header::SET_COOKIE},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::{
    CookieJar,
    cookie::{Cookie, SameSite},
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::AppError;

/// User session data
///
/// Stored in a signed cookie. Empty until the passwordless callback
/// succeeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Authenticated email address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// 1upHealth access token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oneup_access_token: Option<String>,
}

/// Change requested by a handler, applied by [`session_layer`]
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Sign and send this session
    Set(Session),
    /// Remove the cookie
    Clear,
}

#[derive(Serialize, Deserialize)]
struct SignedPayload {
    session: Session,
    expires_at: DateTime<Utc>,
}

type HmacSha256 = hmac::Hmac<sha2::Sha256>;

fn mac_for(key: &str) -> Result<HmacSha256, AppError> {
    use hmac::Mac;

    HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| AppError::Encryption(e.to_string()))
}

/// Encode a session into a signed cookie value
///
/// Format: base64(payload).base64(hmac_sha256(base64(payload))), signed with
/// the first key in `keys`.
///
/// # Errors
/// Returns error if `keys` is empty or the payload cannot be serialized
pub fn encode_session(session: &Session, keys: &[String], max_age: Duration) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::Mac;

    let signing_key = keys
        .first()
        .ok_or_else(|| AppError::Encryption("no session signing key configured".to_string()))?;

    let expires_at = Utc::now()
        .checked_add_signed(max_age)
        .ok_or_else(|| AppError::Encryption("session max age is out of range".to_string()))?;

    let payload = SignedPayload {
        session: session.clone(),
        expires_at,
    };
    let payload = serde_json::to_vec(&payload).map_err(|e| AppError::Internal(e.into()))?;
    let payload_b64 = general_purpose::URL_SAFE_NO_PAD.encode(payload);

    let mut mac = mac_for(signing_key)?;
    mac.update(payload_b64.as_bytes());
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload_b64, signature_b64))
}

/// Verify and decode a signed cookie value
///
/// Any key in `keys` is accepted so that keys can be rotated. Returns `None`
/// for malformed, tampered or expired values.
pub fn decode_session(value: &str, keys: &[String]) -> Option<Session> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::Mac;

    let (payload_b64, signature_b64) = value.split_once('.')?;
    let signature = general_purpose::URL_SAFE_NO_PAD.decode(signature_b64).ok()?;

    let verified = keys.iter().any(|key| {
        mac_for(key)
            .map(|mut mac| {
                mac.update(payload_b64.as_bytes());
                mac.verify_slice(&signature).is_ok()
            })
            .unwrap_or(false)
    });
    if !verified {
        return None;
    }

    let payload_bytes = general_purpose::URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
    let payload: SignedPayload = serde_json::from_slice(&payload_bytes).ok()?;

    if payload.expires_at < Utc::now() {
        return None;
    }

    Some(payload.session)
}

/// Decode the session cookie, or an empty session when absent or invalid
pub fn session_from_jar(jar: &CookieJar, state: &AppState) -> Session {
    let config = &state.config.session;
    match jar.get(&config.cookie_name) {
        Some(cookie) => decode_session(cookie.value(), &config.keys).unwrap_or_else(|| {
            tracing::debug!("Ignoring invalid or expired session cookie");
            Session::default()
        }),
        None => Session::default(),
    }
}

/// Build the `Set-Cookie` value for an update
pub fn build_session_cookie(
    update: &SessionUpdate,
    state: &AppState,
) -> Result<Cookie<'static>, AppError> {
    let config = &state.config.session;
    let secure = state.config.should_use_secure_cookies();

    let mut cookie = match update {
        SessionUpdate::Set(session) => {
            let max_age = Duration::try_seconds(config.max_age_seconds).ok_or_else(|| {
                AppError::Config("session.max_age_seconds is out of range".to_string())
            })?;
            let value = encode_session(session, &config.keys, max_age)?;
            Cookie::build((config.cookie_name.clone(), value))
                .max_age(time::Duration::seconds(config.max_age_seconds))
                .build()
        }
        SessionUpdate::Clear => Cookie::build((config.cookie_name.clone(), ""))
            .max_age(time::Duration::ZERO)
            .build(),
    };

    cookie.set_path("/");
    cookie.set_http_only(true);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_secure(secure);
    Ok(cookie)
}

/// Middleware decoding the session cookie
///
/// Inserts the decoded [`Session`] into request extensions and writes back
/// any [`SessionUpdate`] the inner service attached to its response.
pub async fn session_layer(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = session_from_jar(&jar, &state);
    request.extensions_mut().insert(session);

    let mut response = next.run(request).await;

    if let Some(update) = response.extensions_mut().remove::<SessionUpdate>() {
        match build_session_cookie(&update, &state) {
            Ok(cookie) => match HeaderValue::from_str(&cookie.to_string()) {
                Ok(value) => {
                    response.headers_mut().append(SET_COOKIE, value);
                }
                Err(error) => tracing::error!(%error, "Session cookie is not a valid header"),
            },
            Err(error) => tracing::error!(%error, "Failed to encode session cookie"),
        }
    }

    response
}
