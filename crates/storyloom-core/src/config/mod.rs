//! Configuration management for Storyloom.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (`~/.storyloom/config.toml`)
//! 3. Environment variable overrides (`STORYLOOM_` prefix)

mod env_overrides;
mod types;
mod validation;

pub use types::{
    GenerationConfig, LlmConfig, RuntimeConfig, ScannerConfig, StorageConfig, SweeperConfig,
};

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for the Storyloom backplane.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// LLM provider configuration.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Data storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chapter generation pipeline settings.
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Prose scanner pattern limits.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Self-healing sweeper settings.
    #[serde(default)]
    pub sweeper: SweeperConfig,

    /// Worker pool and concurrency settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let expanded = expand_tilde(path);

        if !Path::new(&expanded).exists() {
            return Err(ConfigError::FileNotFound { path: expanded });
        }

        let contents = std::fs::read_to_string(&expanded).map_err(|e| ConfigError::InvalidValue {
            field: "config".to_string(),
            message: format!("failed to read {expanded}: {e}"),
        })?;

        let mut config: Config =
            toml::from_str(&contents).map_err(|source| ConfigError::ParseError { source })?;

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load defaults plus environment overrides, without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// The default config file path.
    pub fn default_path() -> String {
        "~/.storyloom/config.toml".to_string()
    }
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.generation.max_regenerations, 3);
        assert_eq!(config.sweeper.max_recovery_retries, 2);
        assert_eq!(config.sweeper.interval_secs, 300);
        assert_eq!(config.sweeper.staleness_secs, 3600);
        assert!(config.generation.word_count_min < config.generation.word_count_max);
    }

    #[test]
    fn load_missing_file_errors() {
        let err = Config::load("/nonexistent/storyloom.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_parses_toml_sections() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).expect("create");
        writeln!(
            file,
            r#"
[llm]
provider = "anthropic"
api_key = "test-key"
model_generation = "claude-sonnet-4-5-20250514"

[generation]
max_regenerations = 5

[sweeper]
interval_secs = 60
"#
        )
        .expect("write");

        let config = Config::load(path.to_str().expect("path")).expect("load");
        assert_eq!(config.llm.provider, "anthropic");
        assert_eq!(config.generation.max_regenerations, 5);
        assert_eq!(config.sweeper.interval_secs, 60);
        // Unspecified sections fall back to defaults.
        assert_eq!(config.sweeper.max_recovery_retries, 2);
    }

    #[test]
    fn expand_tilde_passthrough() {
        assert_eq!(expand_tilde("/tmp/db.sqlite"), "/tmp/db.sqlite");
    }
}
