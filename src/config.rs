//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config.json, config/local.*)
//! 3. Environment variables (override)

use serde::Deserialize;

/// Signing keys shipped with the demo. Refused in production.
pub const DEMO_SESSION_KEYS: [&str; 3] = ["Woof", "Meow", "Cluck"];

/// Upper bound for cookie and token lifetimes (10 years)
pub const MAX_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Upstream API base URL, target of both the proxy and the aggregator
    #[serde(alias = "baseurl", alias = "baseURL")]
    pub base_url: String,
    /// Selected from NODE_ENV
    pub mode: RunMode,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub auth: AuthConfig,
    pub proxy: ProxyConfig,
    pub upstream: UpstreamConfig,
    pub oneup: OneUpConfig,
    pub metrics: MetricsConfig,
}

/// Development or production mode
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Development,
    Production,
}

impl RunMode {
    /// Anything other than `production` is development.
    pub fn from_node_env(value: Option<&str>) -> Self {
        match value {
            Some("production") => RunMode::Production,
            _ => RunMode::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Development => "development",
            RunMode::Production => "production",
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (default: 3001)
    pub port: u16,
    /// Public URL used in emailed callback links
    pub public_url: String,
}

/// Session cookie configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Cookie name (default: "demoappsession")
    pub cookie_name: String,
    /// Signing keys; the first signs, all verify
    pub keys: Vec<String>,
    /// Cookie max age in seconds (default: 86400 = 24h)
    pub max_age_seconds: i64,
}

/// Passwordless authentication configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Token lifetime in seconds (default: 900)
    pub token_ttl_seconds: i64,
    /// Where an accepted token redirects to
    pub success_redirect: String,
    /// Where the auth gate sends anonymous requests
    pub login_path: String,
}

/// Upstream proxy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Path prefixes forwarded upstream before any local handling
    pub paths: Vec<String>,
    /// Value of CF-Access-Client-Id (EVI_CF_ACCESS_CLIENT_ID)
    pub client_id: String,
    /// Value of CF-Access-Client-Secret (EVI_CF_ACCESS_SECRET)
    pub client_secret: String,
    /// Maximum forwarded request body size in bytes
    pub max_body_bytes: usize,
}

/// Shared HTTP client settings for upstream calls
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Request timeout in seconds (default: 30)
    pub timeout_seconds: u64,
}

/// 1upHealth FHIR aggregation settings
#[derive(Debug, Clone, Deserialize)]
pub struct OneUpConfig {
    /// FHIR version path segment (default: "r4")
    pub fhir_version: String,
    /// Resource types fetched for the dashboard
    pub resource_types: Vec<String>,
}

/// Metrics endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Mount GET /metrics
    pub enabled: bool,
}

fn default_resource_types() -> Vec<&'static str> {
    vec![
        "Patient",
        "Encounter",
        "Condition",
        "Observation",
        "MedicationRequest",
        "AllergyIntolerance",
        "Procedure",
        "Immunization",
        "CarePlan",
    ]
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config.json / config.toml (if exists)
    /// 3. config/local.* (if exists)
    /// 4. Environment variables (HEALTHDASH__*)
    /// 5. NODE_ENV, EVI_CF_ACCESS_CLIENT_ID, EVI_CF_ACCESS_SECRET
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let mode = RunMode::from_node_env(std::env::var("NODE_ENV").ok().as_deref());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3001)?
            .set_default("server.public_url", "http://localhost:3001")?
            .set_default("session.cookie_name", "demoappsession")?
            .set_default("session.keys", DEMO_SESSION_KEYS.to_vec())?
            .set_default("session.max_age_seconds", 86400)?
            .set_default("auth.token_ttl_seconds", 900)?
            .set_default("auth.success_redirect", "/dashboard")?
            .set_default("auth.login_path", "/login")?
            .set_default("proxy.paths", vec!["/api/v1"])?
            .set_default("proxy.client_id", "")?
            .set_default("proxy.client_secret", "")?
            .set_default("proxy.max_body_bytes", 10 * 1024 * 1024)?
            .set_default("upstream.timeout_seconds", 30)?
            .set_default("oneup.fhir_version", "r4")?
            .set_default("oneup.resource_types", default_resource_types())?
            .set_default("metrics.enabled", false)?
            // config.json carries baseURL
            .add_source(File::with_name("config").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (HEALTHDASH__*)
            .add_source(
                Environment::with_prefix("HEALTHDASH")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("session.keys")
                    .with_list_parse_key("proxy.paths")
                    .with_list_parse_key("oneup.resource_types")
                    .try_parsing(true),
            )
            .set_override("mode", mode.as_str())?
            .set_override_option(
                "proxy.client_id",
                std::env::var("EVI_CF_ACCESS_CLIENT_ID").ok(),
            )?
            .set_override_option(
                "proxy.client_secret",
                std::env::var("EVI_CF_ACCESS_SECRET").ok(),
            )?
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.mode == RunMode::Production
    }

    /// Validate loaded values
    ///
    /// Also warns about proxy prefixes that shadow local routes: the proxy
    /// runs before session and auth handling, so such routes are never
    /// reached locally.
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        use crate::error::AppError;

        match url::Url::parse(&self.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => {}
            _ => {
                return Err(AppError::Config(format!(
                    "baseURL must be an absolute http(s) URL, got {:?}",
                    self.base_url
                )));
            }
        }

        if self.session.keys.is_empty() || self.session.keys.iter().any(|k| k.is_empty()) {
            return Err(AppError::Config(
                "session.keys must contain at least one non-empty key".to_string(),
            ));
        }

        for (key, seconds) in [
            ("session.max_age_seconds", self.session.max_age_seconds),
            ("auth.token_ttl_seconds", self.auth.token_ttl_seconds),
        ] {
            if !(1..=MAX_LIFETIME_SECONDS).contains(&seconds) {
                return Err(AppError::Config(format!(
                    "{key} must be between 1 and {MAX_LIFETIME_SECONDS}, got {seconds}"
                )));
            }
        }

        if let Some(path) = self.proxy.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(AppError::Config(format!(
                "proxy.paths entries must start with '/', got {path:?}"
            )));
        }

        let uses_demo_keys = self
            .session
            .keys
            .iter()
            .any(|k| DEMO_SESSION_KEYS.contains(&k.as_str()));
        if uses_demo_keys {
            if self.mode == RunMode::Production {
                return Err(AppError::Config(
                    "session.keys must not contain the demo keys in production".to_string(),
                ));
            }
            tracing::warn!("Signing session cookies with the built-in demo keys");
        }

        if self.proxy.client_id.is_empty() || self.proxy.client_secret.is_empty() {
            tracing::warn!(
                "EVI_CF_ACCESS_CLIENT_ID or EVI_CF_ACCESS_SECRET is empty; proxied requests will carry empty credentials"
            );
        }

        for (prefix, route) in crate::proxy::shadowed_routes(&self.proxy.paths) {
            tracing::warn!(
                prefix = %prefix,
                route = %route,
                "Proxy prefix shadows a local route; requests bypass local auth"
            );
        }

        Ok(())
    }
}
