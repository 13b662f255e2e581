//! 1upHealth FHIR client
//!
//! Bundles the per-resource FHIR searches behind a single call so the
//! browser only ever talks to `/api/dashboard`.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::OneUpConfig;
use crate::error::AppError;
use crate::metrics::FHIR_FETCHES_TOTAL;

/// Aggregates FHIR resource bundles for an access token
#[derive(Clone)]
pub struct OneUpClient {
    http_client: Arc<reqwest::Client>,
    base_url: String,
    fhir_version: String,
    resource_types: Vec<String>,
}

impl OneUpClient {
    /// Create new client
    ///
    /// # Arguments
    /// * `http_client` - Shared HTTP client
    /// * `base_url` - API root, e.g. `https://api.1up.health`
    /// * `config` - FHIR version and resource types to fetch
    pub fn new(http_client: Arc<reqwest::Client>, base_url: &str, config: &OneUpConfig) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            fhir_version: config.fhir_version.trim_matches('/').to_string(),
            resource_types: config.resource_types.clone(),
        }
    }

    /// Search URL for one resource type
    pub fn resource_url(&self, resource_type: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.fhir_version, resource_type)
    }

    /// Fetch one resource bundle
    ///
    /// # Errors
    /// Returns error on transport failure, non-success status or a body
    /// that is not JSON
    pub async fn get_fhir_resource_bundle(
        &self,
        access_token: &str,
        resource_type: &str,
    ) -> Result<Value, AppError> {
        let result = self.fetch_bundle(access_token, resource_type).await;

        let outcome = if result.is_ok() { "ok" } else { "error" };
        FHIR_FETCHES_TOTAL
            .with_label_values(&[resource_type, outcome])
            .inc();

        result
    }

    async fn fetch_bundle(&self, access_token: &str, resource_type: &str) -> Result<Value, AppError> {
        let response = self
            .http_client
            .get(self.resource_url(resource_type))
            .bearer_auth(access_token)
            .header("Accept", "application/fhir+json, application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(
                resource_type = %resource_type,
                status = %status,
                "FHIR search failed"
            );
            return Err(AppError::Upstream(format!(
                "{resource_type} search returned {status}"
            )));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| AppError::Upstream(format!("{resource_type} bundle is not JSON: {e}")))
    }

    /// Fetch every configured resource type concurrently
    ///
    /// Returns an object keyed by resource type. The first failure is
    /// returned as the error; partial results are discarded.
    pub async fn get_all_fhir_resource_bundles(
        &self,
        access_token: &str,
    ) -> Result<Map<String, Value>, AppError> {
        let fetches = self
            .resource_types
            .iter()
            .map(|resource_type| self.get_fhir_resource_bundle(access_token, resource_type));

        let bundles = futures::future::try_join_all(fetches).await?;

        tracing::debug!(count = bundles.len(), "Fetched FHIR resource bundles");

        Ok(self.resource_types.iter().cloned().zip(bundles).collect())
    }
}
