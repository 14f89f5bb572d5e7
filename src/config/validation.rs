use super::SessionConfig;
use crate::utils::url_validation::{validate_broker_url, validate_credentialed_url};

/// Validate the merged configuration
pub fn validate(config: &SessionConfig) -> Result<(), String> {
    validate_endpoints(&config.broker_url, &config.realtime_url)?;
    validate_timeouts(config.handshake_timeout_seconds, config.search_timeout_seconds)?;
    validate_realtime(config)?;
    Ok(())
}

/// Broker may be plain HTTP; the realtime endpoint receives the bearer token
pub fn validate_endpoints(broker_url: &str, realtime_url: &str) -> Result<(), String> {
    validate_broker_url(broker_url).map_err(|e| format!("Invalid broker_url '{broker_url}': {e}"))?;
    validate_credentialed_url(realtime_url)
        .map_err(|e| format!("Invalid realtime_url '{realtime_url}': {e}"))?;
    Ok(())
}

pub fn validate_timeouts(handshake_seconds: u64, search_seconds: u64) -> Result<(), String> {
    if handshake_seconds == 0 {
        return Err("handshake timeout must be greater than zero".to_string());
    }
    if search_seconds == 0 {
        return Err("search timeout must be greater than zero".to_string());
    }
    Ok(())
}

pub fn validate_realtime(config: &SessionConfig) -> Result<(), String> {
    if config.model.trim().is_empty() {
        return Err("realtime model must not be empty".to_string());
    }
    if config.data_channel_label.trim().is_empty() {
        return Err("data channel label must not be empty".to_string());
    }
    if config.modalities.is_empty() {
        return Err("at least one response modality is required".to_string());
    }
    Ok(())
}
