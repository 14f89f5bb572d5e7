//! Data channel message types.
//!
//! Every message is a single JSON object tagged by its `type` field.
//!
//! Client events (sent over the channel):
//! - response.create - Request a response for an instruction
//!
//! Server events (received from the channel):
//! - text.partial - Full-so-far response text
//! - text.final - Terminal response text
//! - error - Error reported by the service
//!
//! Any other server event type is accepted and ignored.

use serde::{Deserialize, Serialize};

use super::config::Modality;

// =============================================================================
// Instruction
// =============================================================================

/// A question augmented with search context, ready to be sent as one
/// `response.create` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub question: String,
    pub context: String,
    /// Closing sentence steering how the answer should be written
    pub directive: String,
}

impl Instruction {
    pub fn new(
        question: impl Into<String>,
        context: impl Into<String>,
        directive: impl Into<String>,
    ) -> Self {
        Self {
            question: question.into(),
            context: context.into(),
            directive: directive.into(),
        }
    }

    /// Instruction text as sent in `response.instructions`.
    pub fn text(&self) -> String {
        let mut text = format!(
            "The user asked: \"{}\"\n\nHere's what I found online:\n{}",
            self.question, self.context
        );
        if !self.directive.is_empty() {
            text.push_str("\n\n");
            text.push_str(&self.directive);
        }
        text
    }
}

// =============================================================================
// Client Events
// =============================================================================

/// Response parameters of a `response.create` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
}

/// Events sent to the realtime service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Generate a response
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },
}

impl ClientEvent {
    /// Build the `response.create` event for an instruction.
    pub fn response_create(instruction: &Instruction, modalities: &[Modality]) -> Self {
        Self::ResponseCreate {
            response: ResponseConfig {
                modalities: modalities.to_vec(),
                instructions: instruction.text(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Server Events
// =============================================================================

/// Text payload of `text.partial` and `text.final`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextContent {
    pub content: String,
}

/// Error details from the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    pub param: Option<String>,
    pub event_id: Option<String>,
}

/// Events received from the realtime service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Full-so-far response text
    #[serde(rename = "text.partial")]
    TextPartial { text: TextContent },

    /// Terminal response text
    #[serde(rename = "text.final")]
    TextFinal { text: TextContent },

    /// Error occurred
    #[serde(rename = "error")]
    Error { error: ApiError },

    /// Any event type this client does not handle
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
