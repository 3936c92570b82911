//! Configuration validation logic.

use super::Config;
use crate::error::ConfigError;

impl Config {
    /// Validate the configuration, returning all errors found (not just the first).
    pub fn validate(&self) -> Result<(), Vec<ConfigError>> {
        let mut errors = Vec::new();

        match self.llm.provider.as_str() {
            "anthropic" | "openai" | "ollama" => {}
            _ => {
                errors.push(ConfigError::InvalidValue {
                    field: "llm.provider".to_string(),
                    message: "must be anthropic, openai, or ollama".to_string(),
                });
            }
        }

        if matches!(self.llm.provider.as_str(), "anthropic" | "openai") {
            match &self.llm.api_key {
                Some(key) if !key.is_empty() => {}
                _ => {
                    errors.push(ConfigError::MissingField {
                        field: format!("llm.api_key (required for {} provider)", self.llm.provider),
                    });
                }
            }
        }

        if self.generation.word_count_min >= self.generation.word_count_max {
            errors.push(ConfigError::InvalidValue {
                field: "generation.word_count_min".to_string(),
                message: "must be less than generation.word_count_max".to_string(),
            });
        }

        if !(1.0..=10.0).contains(&self.generation.quality_pass_threshold) {
            errors.push(ConfigError::InvalidValue {
                field: "generation.quality_pass_threshold".to_string(),
                message: "must be between 1.0 and 10.0".to_string(),
            });
        }

        if self.runtime.concurrent_stories == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "runtime.concurrent_stories".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.sweeper.interval_secs == 0 {
            errors.push(ConfigError::InvalidValue {
                field: "sweeper.interval_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
