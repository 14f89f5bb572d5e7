//! Configuration module for voice sessions
//!
//! This module handles session configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_session::config::SessionConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = SessionConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("session.yaml");
//! let config = SessionConfig::from_file(&config_path)?;
//!
//! println!("Negotiating with {}", config.realtime_url);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::realtime::{
    DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_URL, Modality,
};

/// Default local session broker.
pub const DEFAULT_BROKER_URL: &str = "http://127.0.0.1:5000";

/// Context used when search fails or finds nothing.
pub const DEFAULT_FALLBACK_CONTEXT: &str = "I couldn't find specific information about that.";

/// Closing sentence of every instruction.
pub const DEFAULT_RESPONSE_DIRECTIVE: &str =
    "Please provide a helpful answer based on this information.";

pub const DEFAULT_HANDSHAKE_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_SEARCH_TIMEOUT_SECONDS: u64 = 15;

/// Session configuration
///
/// Contains everything needed to run a voice session:
/// - Broker endpoint (credential minting and context search)
/// - Realtime endpoint, model and data channel label
/// - Requested response modalities
/// - Instruction fallback context and directive
/// - Handshake and search timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    // Broker
    pub broker_url: String,

    // Realtime service
    pub realtime_url: String,
    pub model: String,
    pub data_channel_label: String,
    pub modalities: Vec<Modality>,

    // Timeouts
    /// Upper bound for credential fetch + negotiation, and again for the channel to open
    pub handshake_timeout_seconds: u64,
    pub search_timeout_seconds: u64,

    // Instruction composition
    pub fallback_context: String,
    pub response_directive: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            modalities: Modality::defaults(),
            handshake_timeout_seconds: DEFAULT_HANDSHAKE_TIMEOUT_SECONDS,
            search_timeout_seconds: DEFAULT_SEARCH_TIMEOUT_SECONDS,
            fallback_context: DEFAULT_FALLBACK_CONTEXT.to_string(),
            response_directive: DEFAULT_RESPONSE_DIRECTIVE.to_string(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables (with defaults)
    ///
    /// The .env file is expected to be loaded by the caller (see `main.rs`).
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// After loading and merging, performs validation on the final configuration.
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        validation::validate(&config)?;
        Ok(config)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_seconds)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    pub(super) fn cleanup_env_vars() {
        unsafe {
            for key in env::ENV_KEYS {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.broker_url, "http://127.0.0.1:5000");
        assert_eq!(config.realtime_url, "https://api.openai.com/v1/realtime");
        assert_eq!(config.model, "gpt-4o-realtime-preview-2024-12-17");
        assert_eq!(config.data_channel_label, "oai-events");
        assert_eq!(config.modalities, vec![Modality::Text, Modality::Audio]);
        assert_eq!(config.handshake_timeout(), Duration::from_secs(30));
        assert_eq!(config.search_timeout(), Duration::from_secs(15));
        assert!(!config.response_directive.to_lowercase().contains("cricket"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        cleanup_env_vars();

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("BROKER_URL", "http://localhost:8000");
            std::env::set_var("REALTIME_MODEL", "gpt-4o-mini-realtime-preview");
            std::env::set_var("RESPONSE_MODALITIES", "text");
            std::env::set_var("SEARCH_TIMEOUT_SECONDS", "5");
        }

        let config = SessionConfig::from_env().unwrap();
        assert_eq!(config.broker_url, "http://localhost:8000");
        assert_eq!(config.model, "gpt-4o-mini-realtime-preview");
        assert_eq!(config.modalities, vec![Modality::Text]);
        assert_eq!(config.search_timeout_seconds, 5);

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_timeout() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("HANDSHAKE_TIMEOUT_SECONDS", "soon");
        }

        let result = SessionConfig::from_env();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("HANDSHAKE_TIMEOUT_SECONDS"));

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_plain_http_realtime() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("REALTIME_URL", "http://api.openai.com/v1/realtime");
        }

        assert!(SessionConfig::from_env().is_err());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_only() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");

        let yaml_content = r#"
broker:
  url: "http://127.0.0.1:7000"

realtime:
  model: "gpt-4o-realtime-preview"
  data_channel_label: "events"
  modalities: ["text"]

assistant:
  response_directive: "Answer in one sentence."

timeouts:
  handshake_seconds: 10
"#;
        fs::write(&config_path, yaml_content).unwrap();

        let config = SessionConfig::from_file(&config_path).unwrap();
        assert_eq!(config.broker_url, "http://127.0.0.1:7000");
        assert_eq!(config.model, "gpt-4o-realtime-preview");
        assert_eq!(config.data_channel_label, "events");
        assert_eq!(config.modalities, vec![Modality::Text]);
        assert_eq!(config.response_directive, "Answer in one sentence.");
        assert_eq!(config.handshake_timeout_seconds, 10);
        // Untouched values keep their defaults
        assert_eq!(config.search_timeout_seconds, DEFAULT_SEARCH_TIMEOUT_SECONDS);
        assert_eq!(config.fallback_context, DEFAULT_FALLBACK_CONTEXT);
    }

    #[test]
    #[serial]
    fn test_from_file_yaml_overrides_env() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("BROKER_URL", "http://127.0.0.1:6000");
            std::env::set_var("REALTIME_MODEL", "env-model");
        }

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");
        fs::write(
            &config_path,
            "broker:\n  url: \"http://127.0.0.1:7000\"\n",
        )
        .unwrap();

        let config = SessionConfig::from_file(&config_path).unwrap();
        assert_eq!(config.broker_url, "http://127.0.0.1:7000");
        assert_eq!(config.model, "env-model");

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_from_file_validation_failure() {
        cleanup_env_vars();

        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("session.yaml");
        fs::write(&config_path, "timeouts:\n  search_seconds: 0\n").unwrap();

        let result = SessionConfig::from_file(&config_path);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("search"));
    }

    #[test]
    fn test_from_file_missing() {
        let result = SessionConfig::from_file(&PathBuf::from("/nonexistent/session.yaml"));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Failed to read config file"));
    }
}
