//! Transport and identifier-assignment seams of the sync engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{SyncError, SyncResult};
use crate::models::{ContentType, ItemId, RemoteItem};

/// Outgoing half of a sync round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Dirty items being saved
    pub items: Vec<RemoteItem>,
    /// Cursor returned by the previous successful round
    #[serde(default)]
    pub sync_token: Option<String>,
    /// Upper bound on retrieved items per round
    pub limit: usize,
}

/// Error payload a sync service may return instead of results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncApiError {
    #[serde(default)]
    pub message: String,
}

/// Incoming half of a sync round
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    /// Items the service persisted from this request
    #[serde(default)]
    pub saved_items: Vec<RemoteItem>,
    /// Items changed elsewhere since the request's cursor
    #[serde(default)]
    pub retrieved_items: Vec<RemoteItem>,
    #[serde(default)]
    pub sync_token: Option<String>,
    #[serde(default)]
    pub error: Option<SyncApiError>,
}

impl SyncResponse {
    /// Convert an embedded error payload into a failed result
    pub fn into_result(self) -> SyncResult<Self> {
        match self.error {
            Some(error) => Err(SyncError::Api(if error.message.trim().is_empty() {
                "sync service reported an error".to_string()
            } else {
                error.message
            })),
            None => Ok(self),
        }
    }
}

/// Request/response collaborator that talks to the remote store
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Perform one round trip
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse>;

    /// Whether saves only reach the local store (no remote account)
    fn is_offline(&self) -> bool {
        false
    }
}

/// Transport used without an account: every batch counts as saved locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalOnlyTransport;

#[async_trait]
impl SyncTransport for LocalOnlyTransport {
    async fn sync(&self, request: SyncRequest) -> SyncResult<SyncResponse> {
        Ok(SyncResponse {
            saved_items: request.items,
            retrieved_items: Vec::new(),
            sync_token: request.sync_token,
            error: None,
        })
    }

    fn is_offline(&self) -> bool {
        true
    }
}

/// Assigns stable identifiers to locally created items
#[async_trait]
pub trait IdentifierAssigner: Send + Sync {
    async fn assign(&self, content_type: ContentType) -> SyncResult<ItemId>;
}

/// Generates time-sortable identifiers on device
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalIdentifierAssigner;

#[async_trait]
impl IdentifierAssigner for LocalIdentifierAssigner {
    async fn assign(&self, _content_type: ContentType) -> SyncResult<ItemId> {
        Ok(ItemId::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_error_becomes_failure() {
        let response = SyncResponse {
            error: Some(SyncApiError {
                message: String::new(),
            }),
            ..Default::default()
        };
        let error = response.into_result().unwrap_err();
        assert!(error.to_string().contains("reported an error"));
    }

    #[test]
    fn response_parses_with_missing_sections() {
        let response: SyncResponse = serde_json::from_str(r#"{"sync_token":"abc"}"#).unwrap();
        assert!(response.saved_items.is_empty());
        assert_eq!(response.sync_token.as_deref(), Some("abc"));
        assert!(response.into_result().is_ok());
    }

    #[tokio::test]
    async fn local_only_transport_echoes_items_as_saved() {
        let request = SyncRequest {
            items: Vec::new(),
            sync_token: Some("cursor".to_string()),
            limit: 10,
        };
        let response = LocalOnlyTransport.sync(request).await.unwrap();
        assert_eq!(response.sync_token.as_deref(), Some("cursor"));
        assert!(LocalOnlyTransport.is_offline());
    }
}
