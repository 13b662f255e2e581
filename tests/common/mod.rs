//! Common test utilities for E2E tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Bytes,
    extract::Path,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use healthdash::auth::{Session, TokenDelivery, encode_session};
use healthdash::{AppState, config};
use tokio::net::TcpListener;

/// Token the fake upstream accepts for FHIR searches
pub const GOOD_TOKEN: &str = "good-token";

/// Delivery that remembers every issued token
#[derive(Default)]
pub struct RecordingDelivery {
    sent: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl RecordingDelivery {
    /// Make every later delivery fail (after recording it)
    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn last_token(&self) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .last()
            .map(|(_, token)| token.clone())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl TokenDelivery for RecordingDelivery {
    async fn deliver(&self, email: &str, token: &str, _callback_url: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((email.to_string(), token.to_string()));

        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("mail server unavailable");
        }
        Ok(())
    }
}

/// Stand-in for the upstream API
///
/// - GET /r4/{type} answers a FHIR bundle for [`GOOD_TOKEN`], 401 otherwise
/// - /api/v1/teapot answers 418 with a custom header
/// - anything else echoes the request as JSON
pub struct FakeUpstream {
    pub addr: String,
}

impl FakeUpstream {
    pub async fn start() -> Self {
        let app = Router::new()
            .route("/r4/:resource", get(fhir_search))
            .route("/api/v1/teapot", get(teapot))
            .fallback(echo);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr }
    }
}

async fn fhir_search(Path(resource): Path<String>, headers: HeaderMap) -> Response {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {GOOD_TOKEN}"));

    if !authorized {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    }

    Json(serde_json::json!({
        "resourceType": "Bundle",
        "type": "searchset",
        "total": 1,
        "entry": [{ "resource": { "resourceType": resource, "id": "1" } }]
    }))
    .into_response()
}

async fn teapot() -> Response {
    (
        StatusCode::IM_A_TEAPOT,
        [("x-upstream", "yes")],
        "short and stout",
    )
        .into_response()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<serde_json::Value> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    };

    Json(serde_json::json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "client_id": header("cf-access-client-id"),
        "client_secret": header("cf-access-client-secret"),
        "origin": header("origin"),
        "host": header("host"),
        "authorization": header("authorization"),
        "body": String::from_utf8_lossy(&body),
    }))
}

/// Test configuration pointing at `base_url`
pub fn test_config(base_url: &str) -> config::AppConfig {
    config::AppConfig {
        base_url: base_url.to_string(),
        mode: config::RunMode::Development,
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            public_url: "http://localhost:3001".to_string(),
        },
        session: config::SessionConfig {
            cookie_name: "demoappsession".to_string(),
            keys: vec![
                "test-signing-key-current".to_string(),
                "test-signing-key-retired".to_string(),
            ],
            max_age_seconds: 86_400,
        },
        auth: config::AuthConfig {
            token_ttl_seconds: 900,
            success_redirect: "/dashboard".to_string(),
            login_path: "/login".to_string(),
        },
        proxy: config::ProxyConfig {
            paths: vec!["/api/v1".to_string()],
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            max_body_bytes: 1024 * 1024,
        },
        upstream: config::UpstreamConfig { timeout_seconds: 10 },
        oneup: config::OneUpConfig {
            fhir_version: "r4".to_string(),
            resource_types: vec!["Patient".to_string(), "Observation".to_string()],
        },
        metrics: config::MetricsConfig { enabled: false },
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub upstream: FakeUpstream,
    pub delivery: Arc<RecordingDelivery>,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server after adjusting the default test configuration
    pub async fn with_config(customize: impl FnOnce(&mut config::AppConfig)) -> Self {
        let upstream = FakeUpstream::start().await;

        let mut config = test_config(&upstream.addr);
        customize(&mut config);

        let delivery = Arc::new(RecordingDelivery::default());
        let state = AppState::with_delivery(config, delivery.clone()).unwrap();

        // Redirects are asserted on, never followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = healthdash::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            state,
            upstream,
            delivery,
            client,
        }
    }

    /// Get base URL for requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// `Cookie` header value carrying `session`, signed with `keys`
    pub fn cookie_signed_with(&self, session: &Session, keys: &[String]) -> String {
        let value = encode_session(session, keys, chrono::Duration::hours(24))
            .expect("Failed to sign test session");
        format!("{}={}", self.state.config.session.cookie_name, value)
    }

    /// `Cookie` header value carrying `session`, signed with the current key
    pub fn session_cookie(&self, session: &Session) -> String {
        self.cookie_signed_with(session, &self.state.config.session.keys)
    }

    /// Request a token for `email` and return it
    pub async fn request_token(&self, email: &str) -> String {
        let response = self
            .client
            .post(self.url("/sendtoken"))
            .json(&serde_json::json!({ "user": email }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        self.delivery.last_token().expect("token was delivered")
    }

    /// Run the whole email login and return the session `Cookie` value
    pub async fn login(&self, email: &str) -> String {
        let token = self.request_token(email).await;
        let response = self
            .client
            .get(self.url(&format!("/callback?token={token}")))
            .send()
            .await
            .unwrap();

        assert_eq!(location(&response).as_deref(), Some("/dashboard"));
        set_session_cookie(&response).expect("login sets the session cookie")
    }
}

/// `Location` header of a response
pub fn location(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

/// `name=value` part of the `demoappsession` Set-Cookie header
pub fn set_session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("demoappsession="))
        .and_then(|v| v.split(';').next())
        .map(str::to_owned)
}
