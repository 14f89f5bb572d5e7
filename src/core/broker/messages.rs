//! Broker request and response bodies.

use serde::{Deserialize, Serialize};

/// `GET /session` response.
///
/// The broker answers either with a `client_secret` or with an `error` field.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionResponse {
    pub client_secret: Option<ClientSecret>,
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub value: String,
    /// Unix timestamp; informational only, expiry is enforced by the service
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// `POST /search` request body.
#[derive(Debug, Clone, Serialize)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
}

/// `POST /search` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub results: Option<Vec<SearchResult>>,
    pub error: Option<serde_json::Value>,
}

/// One search hit used as question context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub url: String,
    pub content: String,
}
