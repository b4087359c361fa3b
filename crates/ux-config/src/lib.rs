mod defaults;
mod env;
pub mod types;
mod validation;

use std::path::Path;

pub use defaults::{
    DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, DEFAULT_MAX_STEPS, DEFAULT_MAX_STEPS_CAP,
    DEFAULT_MODEL, DEFAULT_QUEUE_MAX_RETRIES,
};
pub use types::*;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Missing environment variables: {0:?}")]
    MissingEnvVars(Vec<String>),

    #[error("Value {value} for '{field}' is out of range (expected {expected})")]
    OutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UxConfig {
    /// Parse a configuration from a YAML string.
    /// Environment variables in the format `${VAR_NAME}` will be interpolated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let interpolated = env::interpolate_env(yaml)?;
        let config: UxConfig = serde_yaml::from_str(&interpolated)?;
        Ok(config)
    }

    /// Load a configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Render the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
name: checkout-study
run:
  model: gpt-4o
"#;

        let config = UxConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("checkout-study".to_string()));
        assert_eq!(config.model(), "gpt-4o");
        assert_eq!(config.max_steps(), DEFAULT_MAX_STEPS);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
name: onboarding
run:
  model: claude-sonnet
  max_steps: 8
  seed: 42
workers:
  concurrency: 2
  poll_interval: 50ms
  batch_size: 4
queue:
  path: /tmp/ux-queue.db
  max_retries: 5
  base_backoff: 1s
limits:
  max_steps_cap: 20
logging:
  level: debug
  format: json
"#;

        let config = UxConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.run.seed, Some(42));
        assert_eq!(config.concurrency(), 2);
        assert_eq!(config.poll_interval(), std::time::Duration::from_millis(50));
        assert_eq!(config.queue_max_retries(), 5);
        assert_eq!(config.max_steps_cap(), 20);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_with_env_vars() {
        std::env::set_var("UX_TEST_QUEUE_PATH", "/tmp/from-env.db");

        let yaml = r#"
queue:
  path: ${UX_TEST_QUEUE_PATH}
"#;

        let config = UxConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.queue.path,
            Some(std::path::PathBuf::from("/tmp/from-env.db"))
        );
    }

    #[test]
    fn test_demo_config_is_valid() {
        let config = UxConfig::from_yaml(include_str!("../../../demos/ux.yaml")).unwrap();
        assert!(!config.model().is_empty());
        assert_eq!(config.concurrency(), 4);
        assert_eq!(config.poll_interval(), std::time::Duration::from_millis(50));
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_bad_duration_is_yaml_error() {
        let yaml = r#"
workers:
  poll_interval: soon
"#;
        assert!(matches!(
            UxConfig::from_yaml(yaml),
            Err(ConfigError::YamlError(_))
        ));
    }

    #[test]
    fn test_yaml_roundtrip_of_effective_config() {
        let effective = UxConfig::default().effective();
        let yaml = effective.to_yaml().unwrap();
        let parsed = UxConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.concurrency(), effective.concurrency());
        assert_eq!(parsed.poll_interval(), effective.poll_interval());
    }
}
