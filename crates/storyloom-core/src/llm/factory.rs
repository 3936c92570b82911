//! Provider construction from configuration.
//!
//! Builds one gateway per model role (generation, validation, extraction)
//! so a deployment can mix model tiers, all sharing one HTTP client.

use super::anthropic::AnthropicProvider;
use super::openai_compat::OpenAiCompatProvider;
use super::{LlmGateway, LlmProvider};
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;
use std::time::Duration;

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Ollama base URL (OpenAI-compatible endpoint).
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// One gateway per pipeline role.
#[derive(Debug, Clone)]
pub struct ModelSet {
    /// Chapter, bible, arc, and premise prose generation.
    pub generation: LlmGateway,
    /// Constraint validation, quality review, consistency checks.
    pub validation: LlmGateway,
    /// Constraint/entity extraction and the editor brief.
    pub extraction: LlmGateway,
}

/// Build the model set from LLM configuration.
pub fn build_model_set(config: &LlmConfig) -> Result<ModelSet, LlmError> {
    let client = reqwest::Client::new();
    let timeout = Duration::from_secs(config.timeout_secs);

    let gateway = |model: &str| -> Result<LlmGateway, LlmError> {
        let provider = build_provider(&client, config, model)?;
        Ok(LlmGateway::new(
            provider,
            model.to_string(),
            timeout,
            config.max_attempts,
        ))
    };

    Ok(ModelSet {
        generation: gateway(&config.model_generation)?,
        validation: gateway(&config.model_validation)?,
        extraction: gateway(&config.model_extraction)?,
    })
}

fn build_provider(
    client: &reqwest::Client,
    config: &LlmConfig,
    model: &str,
) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.provider.as_str() {
        "anthropic" => {
            let api_key = require_key(config)?;
            Ok(match &config.base_url {
                Some(url) => Arc::new(AnthropicProvider::with_base_url(
                    client.clone(),
                    api_key,
                    model.to_string(),
                    url.clone(),
                )),
                None => Arc::new(AnthropicProvider::new(
                    client.clone(),
                    api_key,
                    model.to_string(),
                )),
            })
        }
        "openai" => {
            let api_key = require_key(config)?;
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string());
            Ok(Arc::new(OpenAiCompatProvider::new(
                client.clone(),
                base_url,
                api_key,
                model.to_string(),
                "openai".to_string(),
            )))
        }
        "ollama" => {
            let base_url = config
                .base_url
                .clone()
                .unwrap_or_else(|| OLLAMA_BASE_URL.to_string());
            Ok(Arc::new(OpenAiCompatProvider::new(
                client.clone(),
                base_url,
                // Ollama ignores the key but the header must be present.
                config.api_key.clone().unwrap_or_else(|| "ollama".to_string()),
                model.to_string(),
                "ollama".to_string(),
            )))
        }
        _ => Err(LlmError::NotConfigured),
    }
}

fn require_key(config: &LlmConfig) -> Result<String, LlmError> {
    match &config.api_key {
        Some(key) if !key.is_empty() => Ok(key.clone()),
        _ => Err(LlmError::NotConfigured),
    }
}
