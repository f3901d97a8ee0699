//! HTTP utilities for GCP REST API calls
//!
//! Read-only GETs with status classification: 404 means "no such resource",
//! every other non-2xx is a [`BackendError`].

use crate::error::BackendError;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Per-request timeout unless configured otherwise
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Truncate long bodies and drop non-printable characters before logging
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Map a failed status to a user-facing backend error without echoing the body
pub fn classify_status(status: StatusCode) -> BackendError {
    let code = status.as_u16();
    match code {
        401 => BackendError::Unauthorized(
            "Authentication failed. Run 'gcloud auth application-default login'.".to_string(),
        ),
        403 => BackendError::Unauthorized(
            "Permission denied. Check your GCP IAM permissions.".to_string(),
        ),
        408 | 504 => BackendError::Timeout,
        429 => BackendError::Http {
            status: code,
            message: "Rate limit exceeded.".to_string(),
        },
        500..=599 => BackendError::Http {
            status: code,
            message: "GCP service temporarily unavailable.".to_string(),
        },
        _ => BackendError::Http {
            status: code,
            message: status
                .canonical_reason()
                .unwrap_or("Request failed")
                .to_string(),
        },
    }
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent(concat!("cloudcheck/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// GET a JSON document; `Ok(None)` when the API answers 404
    pub async fn get(&self, url: &str, token: &str) -> Result<Option<Value>, BackendError> {
        tracing::debug!("GET {}", url);

        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            tracing::debug!("GET {} -> 404", url);
            return Ok(None);
        }

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(classify_status(status));
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| BackendError::Decode(e.to_string()))
    }
}
