//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("healthdash_http_requests_total", "Total number of locally handled HTTP requests"),
        &["method", "status"]
    ).expect("metric can be created");

    // Upstream Metrics
    pub static ref PROXY_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("healthdash_proxy_requests_total", "Total number of requests forwarded upstream"),
        &["status"]
    ).expect("metric can be created");
    pub static ref FHIR_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("healthdash_fhir_fetches_total", "Total number of FHIR resource fetches"),
        &["resource_type", "outcome"]
    ).expect("metric can be created");

    // Auth Metrics
    pub static ref TOKENS_ISSUED_TOTAL: IntCounter = IntCounter::new(
        "healthdash_tokens_issued_total",
        "Total number of passwordless tokens issued"
    ).expect("metric can be created");
    pub static ref TOKENS_ACCEPTED_TOTAL: IntCounter = IntCounter::new(
        "healthdash_tokens_accepted_total",
        "Total number of passwordless tokens accepted"
    ).expect("metric can be created");

    pub static ref PENDING_TOKENS: IntGauge = IntGauge::new(
        "healthdash_pending_tokens",
        "Passwordless tokens issued and not yet consumed, expired ones included"
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("healthdash_errors_total", "Total number of errors"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PROXY_REQUESTS_TOTAL.clone()))
            .expect("PROXY_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FHIR_FETCHES_TOTAL.clone()))
            .expect("FHIR_FETCHES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(TOKENS_ISSUED_TOTAL.clone()))
            .expect("TOKENS_ISSUED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(TOKENS_ACCEPTED_TOTAL.clone()))
            .expect("TOKENS_ACCEPTED_TOTAL can be registered");
        REGISTRY
            .register(Box::new(PENDING_TOKENS.clone()))
            .expect("PENDING_TOKENS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
