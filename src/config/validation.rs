use super::{AppConfig, ConfigError};

const VALID_LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_log_level(config)?;
    validate_provider_keys(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    if !VALID_LOG_LEVELS.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {VALID_LOG_LEVELS:?}"
        )));
    }
    Ok(())
}

fn validate_provider_keys(config: &AppConfig) -> Result<(), ConfigError> {
    let providers = &config.providers;
    for (name, key) in [
        ("openai_api_key", &providers.openai_api_key),
        ("anthropic_api_key", &providers.anthropic_api_key),
        ("google_api_key", &providers.google_api_key),
    ] {
        if key.as_deref().is_some_and(|key| key.trim().is_empty()) {
            return Err(validation_err(format!(
                "providers.{name} cannot be empty when set"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_log_level_is_case_insensitive() {
        let mut config = AppConfig::default();
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_log_level() {
        let mut config = AppConfig::default();
        config.features.log_level = "VERBOSE".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("log_level"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut config = AppConfig::default();
        config.providers.anthropic_api_key = Some("  ".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("anthropic_api_key"));
    }
}
