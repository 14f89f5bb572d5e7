use std::env;
use std::fmt::Display;
use std::str::FromStr;

use super::SessionConfig;
use crate::core::realtime::parse_modalities;

/// Every environment variable read by [`load_from_env`].
pub(crate) const ENV_KEYS: [&str; 9] = [
    "BROKER_URL",
    "REALTIME_URL",
    "REALTIME_MODEL",
    "DATA_CHANNEL_LABEL",
    "RESPONSE_MODALITIES",
    "HANDSHAKE_TIMEOUT_SECONDS",
    "SEARCH_TIMEOUT_SECONDS",
    "FALLBACK_CONTEXT",
    "RESPONSE_DIRECTIVE",
];

/// Read a non-empty, trimmed environment variable
fn env_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable, failing with the variable name on bad input
fn env_parse<T>(key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    match env_string(key) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid {key} value '{raw}': {e}")),
        None => Ok(None),
    }
}

/// Load configuration from environment variables, falling back to defaults
pub fn load_from_env() -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let defaults = SessionConfig::default();

    let modalities = match env_string("RESPONSE_MODALITIES") {
        Some(raw) => parse_modalities(&raw)
            .map_err(|e| format!("Invalid RESPONSE_MODALITIES value '{raw}': {e}"))?,
        None => defaults.modalities,
    };

    Ok(SessionConfig {
        broker_url: env_string("BROKER_URL").unwrap_or(defaults.broker_url),
        realtime_url: env_string("REALTIME_URL").unwrap_or(defaults.realtime_url),
        model: env_string("REALTIME_MODEL").unwrap_or(defaults.model),
        data_channel_label: env_string("DATA_CHANNEL_LABEL")
            .unwrap_or(defaults.data_channel_label),
        modalities,
        handshake_timeout_seconds: env_parse("HANDSHAKE_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.handshake_timeout_seconds),
        search_timeout_seconds: env_parse("SEARCH_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.search_timeout_seconds),
        fallback_context: env_string("FALLBACK_CONTEXT").unwrap_or(defaults.fallback_context),
        response_directive: env_string("RESPONSE_DIRECTIVE")
            .unwrap_or(defaults.response_directive),
    })
}
