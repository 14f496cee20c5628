//! HTTP sync transport against the managed items endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::transport::{SyncRequest, SyncResponse, SyncTransport};
use super::{SyncError, SyncResult};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const SYNC_HTTP_TIMEOUT_SECS: u64 = 20;

#[derive(Clone)]
pub struct HttpSyncTransport {
    endpoint: String,
    access_token: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSyncTransport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpSyncTransport")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpSyncTransport {
    pub fn new(endpoint: impl Into<String>, access_token: impl Into<String>) -> SyncResult<Self> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        let access_token = access_token.into().trim().to_string();
        if access_token.is_empty() {
            return Err(SyncError::InvalidConfiguration(
                "access token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            endpoint,
            access_token,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(SYNC_HTTP_TIMEOUT_SECS))
                .build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SyncTransport for HttpSyncTransport {
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        let response = self
            .client
            .post(format!("{}/items/sync", self.endpoint))
            .bearer_auth(&self.access_token)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        let payload: SyncResponse = serde_json::from_str(&body)
            .map_err(|error| SyncError::InvalidPayload(error.to_string()))?;
        payload.into_result()
    }
}

#[derive(Debug, Deserialize)]
struct SyncErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<SyncErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> SyncResult<String> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        SyncError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if is_http_url(&endpoint) {
        Ok(endpoint.trim_end_matches('/').to_string())
    } else {
        Err(SyncError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_endpoint_rejects_invalid_values() {
        assert!(normalize_endpoint(String::new()).is_err());
        assert!(normalize_endpoint("api.example.com".to_string()).is_err());
    }

    #[test]
    fn normalize_endpoint_trims_trailing_slash() {
        assert_eq!(
            normalize_endpoint("https://api.example.com/v1/".to_string()).unwrap(),
            "https://api.example.com/v1"
        );
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        let message = parse_api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            r#"{"error":"unavailable","message":"try later"}"#,
        );
        assert_eq!(message, "try later (503)");
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn transport_debug_redacts_token() {
        let transport = HttpSyncTransport::new("https://api.example.com", "secret").unwrap();
        let debug = format!("{transport:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn transport_requires_token() {
        assert!(HttpSyncTransport::new("https://api.example.com", " ").is_err());
    }
}
