//! Environment variable overrides for configuration.

use super::Config;
use crate::error::ConfigError;
use std::env;

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables use the `STORYLOOM_` prefix with double
    /// underscores separating nested keys (e.g., `STORYLOOM_LLM__API_KEY`).
    pub(super) fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        // LLM
        if let Ok(val) = env::var("STORYLOOM_LLM__PROVIDER") {
            self.llm.provider = val;
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__API_KEY") {
            self.llm.api_key = Some(val);
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__BASE_URL") {
            self.llm.base_url = Some(val);
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__MODEL_GENERATION") {
            self.llm.model_generation = val;
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__MODEL_VALIDATION") {
            self.llm.model_validation = val;
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__MODEL_EXTRACTION") {
            self.llm.model_extraction = val;
        }
        if let Ok(val) = env::var("STORYLOOM_LLM__TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_env_u64("STORYLOOM_LLM__TIMEOUT_SECS", &val)?;
        }

        // Storage
        if let Ok(val) = env::var("STORYLOOM_STORAGE__DB_PATH") {
            self.storage.db_path = val;
        }

        // Generation
        if let Ok(val) = env::var("STORYLOOM_GENERATION__MAX_REGENERATIONS") {
            self.generation.max_regenerations =
                parse_env_u32("STORYLOOM_GENERATION__MAX_REGENERATIONS", &val)?;
        }
        if let Ok(val) = env::var("STORYLOOM_GENERATION__QUALITY_PASS_THRESHOLD") {
            self.generation.quality_pass_threshold =
                parse_env_f64("STORYLOOM_GENERATION__QUALITY_PASS_THRESHOLD", &val)?;
        }

        // Sweeper
        if let Ok(val) = env::var("STORYLOOM_SWEEPER__INTERVAL_SECS") {
            self.sweeper.interval_secs = parse_env_u64("STORYLOOM_SWEEPER__INTERVAL_SECS", &val)?;
        }
        if let Ok(val) = env::var("STORYLOOM_SWEEPER__STALENESS_SECS") {
            self.sweeper.staleness_secs = parse_env_u64("STORYLOOM_SWEEPER__STALENESS_SECS", &val)?;
        }
        if let Ok(val) = env::var("STORYLOOM_SWEEPER__MAX_RECOVERY_RETRIES") {
            self.sweeper.max_recovery_retries =
                parse_env_u32("STORYLOOM_SWEEPER__MAX_RECOVERY_RETRIES", &val)?;
        }

        // Runtime
        if let Ok(val) = env::var("STORYLOOM_RUNTIME__CONCURRENT_STORIES") {
            self.runtime.concurrent_stories =
                parse_env_u32("STORYLOOM_RUNTIME__CONCURRENT_STORIES", &val)? as usize;
        }

        Ok(())
    }
}

fn parse_env_u32(var: &str, val: &str) -> Result<u32, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var.to_string(),
        message: format!("'{val}' is not a valid unsigned integer"),
    })
}

fn parse_env_u64(var: &str, val: &str) -> Result<u64, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var.to_string(),
        message: format!("'{val}' is not a valid unsigned integer"),
    })
}

fn parse_env_f64(var: &str, val: &str) -> Result<f64, ConfigError> {
    val.parse().map_err(|_| ConfigError::InvalidValue {
        field: var.to_string(),
        message: format!("'{val}' is not a valid number"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var tests mutate process state; keep them in one test to avoid
    // interference under parallel execution.
    #[test]
    fn overrides_apply_and_reject_garbage() {
        env::set_var("STORYLOOM_LLM__PROVIDER", "ollama");
        env::set_var("STORYLOOM_SWEEPER__INTERVAL_SECS", "60");
        let mut config = Config::default();
        config.apply_env_overrides().expect("apply");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.sweeper.interval_secs, 60);

        env::set_var("STORYLOOM_SWEEPER__INTERVAL_SECS", "soon");
        let mut config = Config::default();
        let err = config.apply_env_overrides().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        env::remove_var("STORYLOOM_LLM__PROVIDER");
        env::remove_var("STORYLOOM_SWEEPER__INTERVAL_SECS");
    }
}
