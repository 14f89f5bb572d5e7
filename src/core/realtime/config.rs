//! Realtime endpoint constants and response modalities.

use serde::{Deserialize, Serialize};

/// Realtime SDP exchange endpoint.
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";

/// Model passed as the `model` query parameter of the SDP exchange.
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Label of the event data channel.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

/// Content type of the offer body.
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

// =============================================================================
// Modalities
// =============================================================================

/// Output modality requested for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Some(Self::Text),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Text and audio, the modalities every instruction asks for by default.
    pub fn defaults() -> Vec<Self> {
        vec![Self::Text, Self::Audio]
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parse a comma separated modality list such as `"text,audio"`.
///
/// Duplicates are dropped, order is kept.
pub fn parse_modalities(value: &str) -> Result<Vec<Modality>, String> {
    let mut modalities = Vec::new();
    for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let modality =
            Modality::parse(part).ok_or_else(|| format!("Unknown response modality '{part}'"))?;
        if !modalities.contains(&modality) {
            modalities.push(modality);
        }
    }
    if modalities.is_empty() {
        return Err("At least one response modality is required".to_string());
    }
    Ok(modalities)
}
