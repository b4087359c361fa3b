use crate::types::UxConfig;
use crate::ConfigError;

impl UxConfig {
    /// Validate the configuration and return a list of errors.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if let Some(ref model) = self.run.model {
            if model.trim().is_empty() {
                errors.push(ConfigError::InvalidConfig(
                    "run.model must not be empty".to_string(),
                ));
            }
        }

        let cap = self.max_steps_cap();
        if cap == 0 {
            errors.push(ConfigError::InvalidConfig(
                "limits.max_steps_cap must be at least 1".to_string(),
            ));
        }

        if let Some(max_steps) = self.run.max_steps {
            if max_steps == 0 || max_steps > cap {
                errors.push(ConfigError::OutOfRange {
                    field: "run.max_steps".to_string(),
                    value: max_steps.to_string(),
                    expected: format!("1..={}", cap),
                });
            }
        }

        if self.workers.concurrency == Some(0) {
            errors.push(ConfigError::OutOfRange {
                field: "workers.concurrency".to_string(),
                value: "0".to_string(),
                expected: ">= 1".to_string(),
            });
        }

        if self.workers.batch_size == Some(0) {
            errors.push(ConfigError::OutOfRange {
                field: "workers.batch_size".to_string(),
                value: "0".to_string(),
                expected: ">= 1".to_string(),
            });
        }

        if self.queue.max_retries == Some(0) {
            errors.push(ConfigError::OutOfRange {
                field: "queue.max_retries".to_string(),
                value: "0".to_string(),
                expected: ">= 1".to_string(),
            });
        }

        if let Some(ref level) = self.logging.level {
            if !matches!(
                level.to_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ) {
                errors.push(ConfigError::InvalidConfig(format!(
                    "Unknown log level '{}'",
                    level
                )));
            }
        }

        errors
    }

    /// Validate and return Ok(()) if valid, or Err with the first error.
    pub fn validate_or_err(&self) -> Result<(), ConfigError> {
        match self.validate().into_iter().next() {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(UxConfig::default().validate().is_empty());
        assert!(UxConfig::default().effective().validate().is_empty());
    }

    #[test]
    fn test_empty_model() {
        let mut config = UxConfig::default();
        config.run.model = Some("  ".to_string());

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::InvalidConfig(msg) if msg.contains("run.model"))));
    }

    #[test]
    fn test_max_steps_above_cap() {
        let mut config = UxConfig::default();
        config.run.max_steps = Some(20);
        config.limits.max_steps_cap = Some(10);

        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::OutOfRange { field, .. } if field == "run.max_steps")));
    }

    #[test]
    fn test_zero_concurrency() {
        let mut config = UxConfig::default();
        config.workers.concurrency = Some(0);

        let errors = config.validate();
        assert!(errors.iter().any(
            |e| matches!(e, ConfigError::OutOfRange { field, .. } if field == "workers.concurrency")
        ));
    }

    #[test]
    fn test_bad_log_level() {
        let mut config = UxConfig::default();
        config.logging.level = Some("loud".to_string());
        assert!(config.validate_or_err().is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = UxConfig::default();
        config.run.max_steps = Some(0);
        config.workers.batch_size = Some(0);
        config.queue.max_retries = Some(0);

        assert_eq!(config.validate().len(), 3);
    }
}
