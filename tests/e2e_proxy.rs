//! E2E tests for the upstream proxy and the page fallback

mod common;

use common::TestServer;

#[tokio::test]
async fn test_proxied_request_carries_access_headers() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v1/user?client_id=abc"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/api/v1/user");
    assert_eq!(echoed["query"], "client_id=abc");
    assert_eq!(echoed["client_id"], "test-client-id");
    assert_eq!(echoed["client_secret"], "test-client-secret");
}

#[tokio::test]
async fn test_proxy_preserves_method_and_body() {
    let server = TestServer::new().await;

    let response = server
        .client
        .put(server.url("/api/v1/user/42"))
        .header("Content-Type", "application/json")
        .body(r#"{"name":"Jane"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["method"], "PUT");
    assert_eq!(echoed["body"], r#"{"name":"Jane"}"#);
}

#[tokio::test]
async fn test_proxy_rewrites_origin_and_host() {
    let server = TestServer::new().await;
    let upstream_host = server.upstream.addr.trim_start_matches("http://").to_string();

    let response = server
        .client
        .get(server.url("/api/v1/user"))
        .header("Origin", "http://localhost:3001")
        .send()
        .await
        .unwrap();

    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["origin"], server.upstream.addr.as_str());
    assert_eq!(echoed["host"], upstream_host.as_str());
}

#[tokio::test]
async fn test_proxy_passes_status_and_headers_through() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v1/teapot"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 418);
    assert_eq!(
        response
            .headers()
            .get("x-upstream")
            .and_then(|v| v.to_str().ok()),
        Some("yes")
    );
    assert_eq!(response.text().await.unwrap(), "short and stout");
}

#[tokio::test]
async fn test_proxy_prefix_shadows_local_route_and_auth() {
    let server = TestServer::with_config(|config| config.proxy.paths = vec!["/api".to_string()])
        .await;

    // No session, yet the request is answered by the upstream
    let response = server
        .client
        .get(server.url("/api/dashboard"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let echoed: serde_json::Value = response.json().await.unwrap();
    assert_eq!(echoed["path"], "/api/dashboard");
    assert_eq!(echoed["client_id"], "test-client-id");
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let server =
        TestServer::with_config(|config| config.base_url = "http://127.0.0.1:9".to_string())
            .await;

    let response = server
        .client
        .get(server.url("/api/v1/user"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_unknown_path_falls_through_to_404_page() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/unknown/route"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
    let body = response.text().await.unwrap();
    assert!(body.contains("This page could not be found."));
}

#[tokio::test]
async fn test_near_miss_prefix_is_not_proxied() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/api/v10/user"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_login_page_resolves_without_auth() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/login"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body = response.text().await.unwrap();
    assert!(body.contains("Email me a login link"));
}

#[tokio::test]
async fn test_metrics_route_is_not_mounted_by_default() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_metrics_route_when_enabled() {
    let server = TestServer::with_config(|config| config.metrics.enabled = true).await;

    let response = server
        .client
        .get(server.url("/metrics"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}
