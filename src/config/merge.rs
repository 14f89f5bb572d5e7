use super::SessionConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;

/// Merge YAML overrides on top of the environment configuration
///
/// Environment variables (and their defaults) form the base; every value set in
/// the YAML file replaces the corresponding base value.
pub fn merge_config(
    yaml_config: Option<YamlConfig>,
) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml_config else {
        return Ok(config);
    };

    if let Some(broker) = yaml.broker {
        if let Some(url) = broker.url {
            config.broker_url = url;
        }
    }

    if let Some(realtime) = yaml.realtime {
        if let Some(url) = realtime.url {
            config.realtime_url = url;
        }
        if let Some(model) = realtime.model {
            config.model = model;
        }
        if let Some(label) = realtime.data_channel_label {
            config.data_channel_label = label;
        }
        if let Some(modalities) = realtime.modalities {
            config.modalities = modalities;
        }
    }

    if let Some(assistant) = yaml.assistant {
        if let Some(fallback) = assistant.fallback_context {
            config.fallback_context = fallback;
        }
        if let Some(directive) = assistant.response_directive {
            config.response_directive = directive;
        }
    }

    if let Some(timeouts) = yaml.timeouts {
        if let Some(handshake) = timeouts.handshake_seconds {
            config.handshake_timeout_seconds = handshake;
        }
        if let Some(search) = timeouts.search_seconds {
            config.search_timeout_seconds = search;
        }
    }

    Ok(config)
}
