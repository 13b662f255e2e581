//! Upstream API proxy
//!
//! Forwards requests under the configured path prefixes to `baseURL`,
//! adding the Cloudflare Access service-token headers. Runs before the
//! session and auth layers, so proxied paths never see local auth.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Uri, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::error::AppError;
use crate::metrics::PROXY_REQUESTS_TOTAL;

/// `CF-Access-Client-Id`
pub const CF_ACCESS_CLIENT_ID: &str = "cf-access-client-id";
/// `CF-Access-Client-Secret`
pub const CF_ACCESS_CLIENT_SECRET: &str = "cf-access-client-secret";

/// Paths served locally; a proxy prefix covering one of these shadows it
pub const LOCAL_ROUTES: &[&str] = &[
    "/",
    "/sendtoken",
    "/callback",
    "/dashboard",
    "/api/dashboard",
    "/logout",
    "/login",
    "/metrics",
];

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Segment-aware prefix match (`/api` matches `/api` and `/api/x`, not `/apix`)
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Local routes hidden behind a proxy prefix, as `(prefix, route)` pairs
pub fn shadowed_routes(prefixes: &[String]) -> Vec<(String, &'static str)> {
    prefixes
        .iter()
        .flat_map(|prefix| {
            LOCAL_ROUTES
                .iter()
                .filter(move |route| matches_prefix(route, prefix))
                .map(move |route| (prefix.clone(), *route))
        })
        .collect()
}

/// Join `base_url` with the inbound path and query
pub fn upstream_url(base_url: &str, uri: &Uri) -> Result<url::Url, AppError> {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let target = format!("{}{}", base_url.trim_end_matches('/'), path_and_query);

    url::Url::parse(&target)
        .map_err(|e| AppError::Config(format!("Invalid upstream URL {target:?}: {e}")))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

fn credential_header(value: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::Config("Access credentials are not valid header values".to_string()))
}

/// Middleware forwarding matching paths upstream
///
/// Non-matching requests continue to the local router.
pub async fn proxy_upstream(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let matched = state
        .config
        .proxy
        .paths
        .iter()
        .any(|prefix| matches_prefix(path, prefix));

    if !matched {
        return next.run(request).await;
    }

    match forward(&state, request).await {
        Ok(response) => response,
        Err(error) => {
            PROXY_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
            error.into_response()
        }
    }
}

async fn forward(state: &AppState, request: Request) -> Result<Response, AppError> {
    let (parts, body) = request.into_parts();
    let target = upstream_url(&state.config.base_url, &parts.uri)?;

    let body = axum::body::to_bytes(body, state.config.proxy.max_body_bytes)
        .await
        .map_err(|e| AppError::Validation(format!("Request body rejected: {e}")))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);
    headers.remove(header::CONTENT_LENGTH);

    if headers.contains_key(header::ORIGIN) {
        let origin = target.origin().ascii_serialization();
        headers.insert(header::ORIGIN, credential_header(&origin)?);
    }

    let proxy = &state.config.proxy;
    headers.insert(CF_ACCESS_CLIENT_ID, credential_header(&proxy.client_id)?);
    headers.insert(CF_ACCESS_CLIENT_SECRET, credential_header(&proxy.client_secret)?);

    tracing::debug!(method = %parts.method, target = %target, "Proxying request upstream");

    let upstream = state
        .http_client
        .request(parts.method, target)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    PROXY_REQUESTS_TOTAL
        .with_label_values(&[status.as_str()])
        .inc();

    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_respects_segments() {
        assert!(matches_prefix("/api/v1", "/api/v1"));
        assert!(matches_prefix("/api/v1/user", "/api/v1"));
        assert!(matches_prefix("/api/v1/user", "/api/v1/"));
        assert!(!matches_prefix("/api/v10", "/api/v1"));
        assert!(!matches_prefix("/api/dashboard", "/api/v1"));
        assert!(matches_prefix("/anything", "/"));
    }

    #[test]
    fn shadowed_routes_are_reported() {
        let shadowed = shadowed_routes(&["/api".to_string(), "/fhir".to_string()]);
        assert_eq!(shadowed, vec![("/api".to_string(), "/api/dashboard")]);

        assert!(shadowed_routes(&["/api/v1".to_string()]).is_empty());
        assert_eq!(shadowed_routes(&["/".to_string()]).len(), LOCAL_ROUTES.len());
    }

    #[test]
    fn upstream_url_keeps_path_and_query() {
        let uri: Uri = "/api/v1/user?client_id=abc".parse().unwrap();
        let url = upstream_url("https://api.1up.health/", &uri).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.1up.health/api/v1/user?client_id=abc"
        );
    }

    #[test]
    fn upstream_url_appends_to_base_path() {
        let uri: Uri = "/api/v1/user".parse().unwrap();
        let url = upstream_url("https://gateway.example.com/evi", &uri).unwrap();
        assert_eq!(url.as_str(), "https://gateway.example.com/evi/api/v1/user");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }
}
