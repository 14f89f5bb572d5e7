//! Question orchestration: search, compose, send.

use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::core::broker::{ContextSearchClient, SearchResult};
use crate::core::realtime::{EventChannel, Instruction};
use crate::errors::{SessionError, SessionResult};

/// Turns a question into an instruction and submits it on the event channel.
///
/// Search never blocks an answer: a failed or empty search degrades to the
/// configured fallback context.
pub struct QueryOrchestrator {
    search: ContextSearchClient,
    fallback_context: String,
    directive: String,
}

impl QueryOrchestrator {
    pub fn new(config: &SessionConfig) -> SessionResult<Self> {
        Ok(Self::with_search(
            ContextSearchClient::new(config)?,
            config.fallback_context.clone(),
            config.response_directive.clone(),
        ))
    }

    pub fn with_search(
        search: ContextSearchClient,
        fallback_context: impl Into<String>,
        directive: impl Into<String>,
    ) -> Self {
        Self {
            search,
            fallback_context: fallback_context.into(),
            directive: directive.into(),
        }
    }

    /// Submit `question`, returning whether the instruction was transmitted.
    ///
    /// User-facing messaging on `false` is left to the caller.
    pub async fn ask(&self, channel: &EventChannel, question: &str) -> bool {
        match self.submit(channel, question).await {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Question could not be submitted");
                false
            }
        }
    }

    /// Like [`ask`](Self::ask) but reports the failure and, on success, the
    /// sequence number the response text will carry.
    pub async fn submit(&self, channel: &EventChannel, question: &str) -> SessionResult<u64> {
        if !channel.is_open() {
            return Err(SessionError::ChannelNotOpen);
        }

        let instruction = self.prepare(question).await;
        let sequence = channel.send(&instruction).await?;
        info!(sequence, "Question submitted");
        Ok(sequence)
    }

    /// Search for context and build the instruction for `question`.
    pub async fn prepare(&self, question: &str) -> Instruction {
        let context = match self.search.search(question).await {
            Ok(results) if !results.is_empty() => {
                debug!(results = results.len(), "Composing context from search results");
                compose_context(&results)
            }
            Ok(_) => {
                debug!("Search returned no results, using fallback context");
                self.fallback_context.clone()
            }
            Err(e) => {
                warn!(error = %e, "Search failed, using fallback context");
                self.fallback_context.clone()
            }
        };

        Instruction::new(question, context, self.directive.clone())
    }
}

/// Join results as `From {url}: {content}` paragraphs, in order.
pub fn compose_context(results: &[SearchResult]) -> String {
    results
        .iter()
        .map(|r| format!("From {}: {}", r.url, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
