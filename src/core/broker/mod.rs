//! Clients for the local session broker.
//!
//! The broker is a small HTTP service next to the client. It mints the
//! short-lived realtime credential (`GET /session`) and runs the web search
//! used as question context (`POST /search`).

pub mod credential;
pub mod messages;
pub mod search;

pub use credential::{Credential, CredentialFetcher};
pub use messages::SearchResult;
pub use search::ContextSearchClient;

use reqwest::Client;
use std::time::Duration;
use url::Url;

use crate::errors::{SessionError, SessionResult};
use crate::utils::url_validation::validate_broker_url;

/// User-Agent header value for broker and realtime requests.
pub(crate) const USER_AGENT: &str = concat!("WaaV-Session/", env!("CARGO_PKG_VERSION"));

/// Connect timeout for every HTTP request.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Build an HTTP client with the given overall request timeout.
pub(crate) fn build_http_client(timeout: Duration) -> SessionResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS).min(timeout))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| SessionError::InvalidConfiguration(format!("Failed to create HTTP client: {e}")))
}

/// Resolve `path` against the broker base URL, keeping any base path prefix.
pub(crate) fn broker_endpoint(base: &str, path: &str) -> SessionResult<Url> {
    let base = validate_broker_url(base)
        .map_err(|e| SessionError::InvalidConfiguration(format!("broker_url: {e}")))?;
    let joined = format!(
        "{}/{}",
        base.as_str().trim_end_matches('/'),
        path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| SessionError::InvalidConfiguration(format!("broker_url: {e}")))
}

/// Render the broker's `error` field, which is usually a string.
pub(crate) fn describe_broker_error(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(message) => message.clone(),
        serde_json::Value::Object(fields) => fields
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
