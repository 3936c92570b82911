//! The three-pass generation pipeline.
//!
//! Submodules:
//! - [`premises`]: premise-set generation from reader preferences.
//! - [`bible`]: story bible generation.
//! - [`arc`]: twelve-chapter arc generation.
//! - [`constraints`]: Pass 1 constraint extraction and Pass 3 validation.
//! - [`prose_scan`]: deterministic forbidden-pattern scanner (no LLM).
//! - [`quality`]: rubric-based quality review.
//! - [`generator`]: Pass 2 chapter generation with bounded regeneration.
//! - [`entities`]: post-commit entity extraction and ledger appends.
//! - [`editor_brief`]: checkpoint feedback into revised outlines.
//! - [`revision`]: consistency validation and surgical revision.
//! - [`prompts`]: deterministic prompt assembly shared across passes.

pub mod arc;
pub mod bible;
pub mod constraints;
pub mod editor_brief;
pub mod entities;
pub mod generator;
pub mod premises;
pub mod prompts;
pub mod prose_scan;
pub mod quality;
pub mod revision;

use crate::error::{LlmError, StorageError};
use crate::llm::{extract, pricing, GenerationParams, LlmGateway, LlmResponse};
use crate::storage::{llm_usage, DbPool};
use serde::de::DeserializeOwned;

/// Errors escalated out of a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// LLM call failed beyond its local retry budget.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Storage call failed beyond its local retry budget.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stage-level failure with durable state already written.
    #[error("stage failed: {message}")]
    Stage {
        /// What failed, recorded into `generation_progress.last_error`.
        message: String,
    },

    /// A progress compare-and-swap missed: another writer owns the story.
    #[error("another writer owns story {story_id}, backing off")]
    LostRace {
        /// The contested story.
        story_id: String,
    },
}

impl PipelineError {
    /// Shorthand for a stage failure.
    pub fn stage(message: impl Into<String>) -> Self {
        PipelineError::Stage {
            message: message.into(),
        }
    }
}

/// Count words the way the word-band check does.
pub fn word_count(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

/// Record an LLM call in the cost ledger.
///
/// Cost accounting never blocks the pipeline; failures are logged and
/// swallowed.
pub(crate) async fn record_usage(
    db: &DbPool,
    user_id: &str,
    operation: &str,
    gateway: &LlmGateway,
    response: &LlmResponse,
    context: Option<serde_json::Value>,
) {
    let cost = pricing::lookup(gateway.provider_name(), &response.model)
        .compute_cost(response.usage.input_tokens, response.usage.output_tokens);

    if let Err(e) = llm_usage::insert_llm_usage(
        db,
        user_id,
        operation,
        gateway.provider_name(),
        &response.model,
        response.usage.input_tokens,
        response.usage.output_tokens,
        cost,
        context.as_ref(),
    )
    .await
    {
        tracing::warn!(error = %e, operation = operation, "failed to record LLM usage");
    }
}

/// Complete a prompt and extract a JSON value, with one tightened retry on
/// malformed output.
///
/// This is the shared ModelMalformed policy: a parse failure earns exactly
/// one retry whose prompt restates the expected shape; a second failure
/// escalates to the caller.
pub(crate) async fn complete_structured<T: DeserializeOwned>(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    operation: &str,
    system: &str,
    user_prompt: &str,
    params: &GenerationParams,
    expected: &str,
) -> Result<T, PipelineError> {
    let response = gateway.complete(system, user_prompt, params).await?;
    record_usage(db, user_id, operation, gateway, &response, None).await;

    match extract::parse_json::<T>(&response.text, expected) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            tracing::warn!(
                operation = operation,
                error = %first_err,
                "malformed structured output, retrying with tightened prompt"
            );

            let tightened = format!(
                "{user_prompt}\n\nYour previous reply could not be parsed. Respond with ONLY a \
                 valid JSON {expected}. No commentary, no code fences."
            );
            let response = gateway.complete(system, &tightened, params).await?;
            record_usage(db, user_id, operation, gateway, &response, None).await;

            extract::parse_json::<T>(&response.text, expected).map_err(PipelineError::from)
        }
    }
}
