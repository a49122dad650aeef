pub mod validation;

use std::io::ErrorKind;

use serde::{Deserialize, Serialize};

use crate::protocol::Provider;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Feature flags and settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Answer replayed tool calls by echoing their arguments.
    #[serde(default = "default_true")]
    pub tool_echo: bool,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            tool_echo: true,
        }
    }
}

/// Vendor API keys handed to the embedding application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_api_key: Option<String>,
}

impl ProvidersConfig {
    #[must_use]
    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        match provider {
            Provider::OpenAi => self.openai_api_key.as_deref(),
            Provider::Anthropic => self.anthropic_api_key.as_deref(),
            Provider::Google => self.google_api_key.as_deref(),
        }
    }

    fn slot_mut(&mut self, provider: Provider) -> &mut Option<String> {
        match provider {
            Provider::OpenAi => &mut self.openai_api_key,
            Provider::Anthropic => &mut self.anthropic_api_key,
            Provider::Google => &mut self.google_api_key,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl AppConfig {
    /// Override provider keys from the environment. Unset or empty variables are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for provider in Provider::ALL {
            if let Some(key) = lookup(provider.api_key_env()).filter(|key| !key.trim().is_empty()) {
                *self.providers.slot_mut(provider) = Some(key);
            }
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
///
/// A missing file yields the defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// [`load_config`] with an explicit environment lookup.
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_with_env<F>(path: &str, lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => AppConfig::default(),
        Ok(contents) => serde_yaml::from_str(&contents)?,
        Err(err) if err.kind() == ErrorKind::NotFound => AppConfig::default(),
        Err(err) => return Err(err.into()),
    };
    config.apply_env_overrides(lookup);
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_load_example_config() {
        let config = load_config_with_env("config.example.yaml", no_env);
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.features.log_level, "INFO");
        assert!(config.features.tool_echo);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = load_config_with_env("does-not-exist.yaml", no_env).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config: AppConfig =
            serde_yaml::from_str("providers:\n  openai_api_key: from-file\n").unwrap();
        config.apply_env_overrides(|name| match name {
            "OPENAI_API_KEY" => Some("from-env".to_string()),
            "GOOGLE_API_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.providers.api_key(Provider::OpenAi), Some("from-env"));
        assert_eq!(config.providers.api_key(Provider::Google), None);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("features:\n  tool_echo: false\n").unwrap();
        assert_eq!(config.features.log_level, "INFO");
        assert!(!config.features.tool_echo);
    }
}
