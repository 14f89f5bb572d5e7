use serde::Deserialize;
use std::path::PathBuf;

use crate::core::realtime::Modality;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present here
/// override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// broker:
///   url: "http://127.0.0.1:5000"
///
/// realtime:
///   url: "https://api.openai.com/v1/realtime"
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   data_channel_label: "oai-events"
///   modalities: ["text", "audio"]
///
/// assistant:
///   fallback_context: "I couldn't find specific information about that."
///   response_directive: "Please provide a helpful answer based on this information."
///
/// timeouts:
///   handshake_seconds: 30
///   search_seconds: 15
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub broker: Option<BrokerYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub assistant: Option<AssistantYaml>,
    pub timeouts: Option<TimeoutsYaml>,
}

/// Session broker configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BrokerYaml {
    pub url: Option<String>,
}

/// Realtime service configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub url: Option<String>,
    pub model: Option<String>,
    pub data_channel_label: Option<String>,
    pub modalities: Option<Vec<Modality>>,
}

/// Instruction composition from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AssistantYaml {
    /// Context used when search fails or returns nothing
    pub fallback_context: Option<String>,
    /// Closing sentence appended to every instruction
    pub response_directive: Option<String>,
}

/// Timeouts from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimeoutsYaml {
    pub handshake_seconds: Option<u64>,
    pub search_seconds: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types or unknown modality names
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
