//! Ephemeral credential retrieval.

use reqwest::Client;
use std::fmt;
use tracing::{debug, info};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::messages::SessionResponse;
use super::{broker_endpoint, build_http_client, describe_broker_error};
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};

const SESSION_PATH: &str = "session";

/// Short-lived bearer token authorizing one transport negotiation.
///
/// Not `Clone`: it is handed to the negotiator by value and wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Credential {
    value: String,
}

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The raw token. Only for building the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

/// Fetches credentials from the broker's `GET /session`.
///
/// Single attempt, no retry; the session decides what a failure means.
pub struct CredentialFetcher {
    http: Client,
    endpoint: Url,
}

impl CredentialFetcher {
    pub fn new(config: &SessionConfig) -> SessionResult<Self> {
        Ok(Self {
            http: build_http_client(config.handshake_timeout())?,
            endpoint: broker_endpoint(&config.broker_url, SESSION_PATH)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub async fn fetch(&self) -> SessionResult<Credential> {
        debug!(endpoint = %self.endpoint, "Requesting session credential");

        let response = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| SessionError::Credential(format!("Session broker unreachable: {e}")))?;

        let status = response.status();
        let mut body = response.text().await.map_err(|e| {
            SessionError::Credential(format!("Failed to read session response: {e}"))
        })?;
        let parsed = serde_json::from_str::<SessionResponse>(&body);
        body.zeroize();

        // An error field wins over the status code: the broker reports
        // upstream failures with either.
        if let Ok(SessionResponse {
            error: Some(error), ..
        }) = &parsed
        {
            return Err(SessionError::Credential(describe_broker_error(error)));
        }

        if !status.is_success() {
            return Err(SessionError::Credential(format!(
                "Session broker returned {status}"
            )));
        }

        let secret = parsed
            .map_err(|e| SessionError::Credential(format!("Invalid session response: {e}")))?
            .client_secret
            .ok_or_else(|| {
                SessionError::Credential("Session response has no client_secret".to_string())
            })?;

        if secret.value.trim().is_empty() {
            return Err(SessionError::Credential(
                "Session response has an empty client_secret".to_string(),
            ));
        }

        info!(expires_at = ?secret.expires_at, "Session credential obtained");
        Ok(Credential::new(secret.value))
    }
}
