//! GCP Client
//!
//! Combines credentials and the HTTP layer, and builds Compute Engine URLs
//! for the configured project and zone.

use super::auth::GcpCredentials;
use super::http::{GcpHttpClient, DEFAULT_REQUEST_TIMEOUT};
use crate::error::BackendError;
use serde_json::Value;
use std::time::Duration;
use url::Url;

/// Public Compute Engine endpoint
pub const COMPUTE_API_BASE: &str = "https://compute.googleapis.com";

/// Zone value that selects the aggregated (all zones) API
pub const ALL_ZONES: &str = "all";

/// Connection settings for [`GcpClient`]
#[derive(Debug, Clone)]
pub struct GcpSettings {
    pub project_id: String,
    pub zone: String,
    pub api_base: String,
    pub request_timeout: Duration,
}

impl GcpSettings {
    pub fn new(project_id: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            zone: zone.into(),
            api_base: COMPUTE_API_BASE.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub zone: String,
    api_base: String,
}

impl GcpClient {
    /// Create a client using Application Default Credentials
    pub async fn new(settings: GcpSettings) -> Result<Self, BackendError> {
        let credentials = GcpCredentials::new()
            .await
            .map_err(|e| BackendError::Unauthorized(format!("{:#}", e)))?;
        Self::with_credentials(settings, credentials)
    }

    pub fn with_credentials(
        settings: GcpSettings,
        credentials: GcpCredentials,
    ) -> Result<Self, BackendError> {
        Ok(Self {
            credentials,
            http: GcpHttpClient::new(settings.request_timeout)?,
            project_id: settings.project_id,
            zone: settings.zone,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
        })
    }

    /// GET a GCP API document; `None` for 404
    pub async fn get(&self, url: &str) -> Result<Option<Value>, BackendError> {
        let token = self
            .credentials
            .get_token()
            .await
            .map_err(|e| BackendError::Unauthorized(format!("{:#}", e)))?;
        self.http.get(url, &token).await
    }

    pub fn is_all_zones(&self) -> bool {
        self.zone == ALL_ZONES
    }

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> String {
        format!(
            "{}/compute/v1/projects/{}/{}",
            self.api_base, self.project_id, path
        )
    }

    /// Build zonal Compute Engine API URL
    pub fn compute_zonal_url(&self, resource: &str) -> String {
        self.compute_url(&format!("zones/{}/{}", self.zone, resource))
    }

    /// Build aggregated Compute Engine API URL (all zones)
    pub fn compute_aggregated_url(&self, resource: &str) -> String {
        self.compute_url(&format!("aggregated/{}", resource))
    }
}

/// Append query parameters, skipping empty values
pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, BackendError> {
    let mut url = Url::parse(base).map_err(|e| BackendError::Other(format!("bad URL {}: {}", base, e)))?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params.iter().filter(|(_, v)| !v.is_empty()) {
            pairs.append_pair(key, value);
        }
    }
    let mut rendered = url.to_string();
    if rendered.ends_with('?') {
        rendered.pop();
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(zone: &str) -> GcpClient {
        let settings = GcpSettings::new("audit-project", zone).api_base("http://localhost:9999/");
        GcpClient::with_credentials(settings, GcpCredentials::fixed("t")).unwrap()
    }

    #[test]
    fn test_compute_urls() {
        let c = client("us-central1-a");
        assert_eq!(
            c.compute_zonal_url("instances"),
            "http://localhost:9999/compute/v1/projects/audit-project/zones/us-central1-a/instances"
        );
        assert_eq!(
            c.compute_aggregated_url("instances"),
            "http://localhost:9999/compute/v1/projects/audit-project/aggregated/instances"
        );
        assert!(!c.is_all_zones());
        assert!(client("all").is_all_zones());
    }

    #[test]
    fn test_with_query_encodes_and_skips_empty() {
        let url = with_query(
            "http://h/x",
            &[("filter", "(name = \"web 1\")"), ("pageToken", "")],
        )
        .unwrap();
        assert_eq!(url, "http://h/x?filter=%28name+%3D+%22web+1%22%29");
        assert_eq!(with_query("http://h/x", &[]).unwrap(), "http://h/x");
    }
}
