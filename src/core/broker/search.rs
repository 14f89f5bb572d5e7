//! Context search against the broker's `POST /search`.

use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use super::messages::{SearchRequest, SearchResponse, SearchResult};
use super::{broker_endpoint, build_http_client, describe_broker_error};
use crate::config::SessionConfig;
use crate::errors::{SessionError, SessionResult};

const SEARCH_PATH: &str = "search";

/// Queries the broker for context relevant to a question.
///
/// Every failure comes back as [`SessionError::Search`]; nothing panics across
/// this boundary so callers can apply one fallback policy.
pub struct ContextSearchClient {
    http: Client,
    endpoint: Url,
}

impl ContextSearchClient {
    pub fn new(config: &SessionConfig) -> SessionResult<Self> {
        Ok(Self {
            http: build_http_client(config.search_timeout())?,
            endpoint: broker_endpoint(&config.broker_url, SEARCH_PATH)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Results in the order the broker returned them.
    pub async fn search(&self, query: &str) -> SessionResult<Vec<SearchResult>> {
        debug!(endpoint = %self.endpoint, "Searching for question context");

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&SearchRequest { query })
            .send()
            .await
            .map_err(|e| SessionError::Search(format!("Search request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SessionError::Search(format!("Failed to read search response: {e}")))?;
        let parsed = serde_json::from_str::<SearchResponse>(&body);

        if !status.is_success() {
            let detail = parsed
                .ok()
                .and_then(|r| r.error)
                .map(|e| describe_broker_error(&e))
                .unwrap_or_else(|| status.to_string());
            warn!(status = status.as_u16(), "Search broker returned an error status");
            return Err(SessionError::Search(detail));
        }

        let parsed =
            parsed.map_err(|e| SessionError::Search(format!("Invalid search response: {e}")))?;
        if let Some(error) = parsed.error {
            return Err(SessionError::Search(describe_broker_error(&error)));
        }

        let results = parsed.results.unwrap_or_default();
        debug!(count = results.len(), "Search completed");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> ContextSearchClient {
        let config = SessionConfig {
            broker_url: server.uri(),
            ..SessionConfig::default()
        };
        ContextSearchClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_search_returns_results_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_json(serde_json::json!({"query": "Who won?"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"url": "https://a.example", "content": "first"},
                    {"url": "https://b.example", "content": "second"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = client_for(&server).await.search("Who won?").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://a.example");
        assert_eq!(results[1].content, "second");
    }

    #[tokio::test]
    async fn test_search_error_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"error": "search backend down"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server).await.search("q").await;
        assert!(matches!(result, Err(SessionError::Search(m)) if m == "search backend down"));
    }

    #[tokio::test]
    async fn test_search_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(
                ResponseTemplate::new(500).set_body_json(serde_json::json!({"error": "boom"})),
            )
            .mount(&server)
            .await;

        let result = client_for(&server).await.search("q").await;
        assert!(matches!(result, Err(SessionError::Search(m)) if m == "boom"));
    }

    #[tokio::test]
    async fn test_search_invalid_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let result = client_for(&server).await.search("q").await;
        assert!(matches!(result, Err(SessionError::Search(_))));
    }

    #[tokio::test]
    async fn test_search_unreachable() {
        let config = SessionConfig {
            broker_url: "http://127.0.0.1:9".to_string(),
            ..SessionConfig::default()
        };
        let client = ContextSearchClient::new(&config).unwrap();
        let result = client.search("q").await;
        assert!(matches!(result, Err(SessionError::Search(_))));
    }
}
