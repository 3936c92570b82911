//! Twelve-chapter arc generation.
//!
//! One LLM pass from the bible to the full chapter-by-chapter outline.
//! Validated structurally (twelve chapters, number permutation, word
//! targets inside the configured band); one corrective retry before the
//! stage fails.

use super::{complete_structured, prompts, PipelineError};
use crate::config::GenerationConfig;
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::DbPool;
use crate::story::{ArcOutline, Bible, Premise};

const ARC_SYSTEM: &str = "You are a story architect planning the chapter arc of a serialized \
novel. Readers give feedback after chapters 2, 5, and 8, so chapters 3, 6, and 9 must end on \
strong hooks. You respond with JSON only.";

fn arc_prompt(premise: &Premise, bible: &Bible, config: &GenerationConfig) -> String {
    format!(
        "{bible_card}\nPREMISE HOOK: {hook}\n\n\
         Plan all twelve chapters. Escalate tension toward chapter 12; place key revelations \
         deliberately. Every chapter needs a word_count_target between {min} and {max}.\n\
         Respond with a JSON object {{\"chapters\": [{{\"chapter_number\", \"title\", \
         \"events_summary\", \"character_focus\", \"tension_level\", \"word_count_target\", \
         \"key_revelations\": [], \"emotional_arc\", \"chapter_hook\"}}]}} with chapter_number \
         1 through 12.",
        bible_card = prompts::bible_card(bible),
        hook = premise.hook,
        min = config.word_count_min,
        max = config.word_count_max,
    )
}

/// Generate the arc for a story. The caller persists it.
pub async fn generate_arc(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    premise: &Premise,
    bible: &Bible,
    config: &GenerationConfig,
) -> Result<ArcOutline, PipelineError> {
    let params = GenerationParams {
        max_tokens: 8192,
        temperature: 0.8,
        system_prompt: None,
    };
    let expected = "object with array 'chapters' of 12 chapter outlines";

    let arc: ArcOutline = complete_structured(
        db,
        gateway,
        user_id,
        "arc",
        ARC_SYSTEM,
        &arc_prompt(premise, bible, config),
        &params,
        expected,
    )
    .await?;

    if let Err(problem) = arc.validate(config.word_count_min, config.word_count_max) {
        tracing::warn!(error = %problem, "arc failed validation, retrying once");
        let retry_prompt = format!(
            "{}\n\nYour previous arc was rejected: {problem}. Fix that and respond again.",
            arc_prompt(premise, bible, config)
        );
        let arc: ArcOutline = complete_structured(
            db,
            gateway,
            user_id,
            "arc",
            ARC_SYSTEM,
            &retry_prompt,
            &params,
            expected,
        )
        .await?;
        arc.validate(config.word_count_min, config.word_count_max)
            .map_err(PipelineError::stage)?;
        return Ok(arc);
    }

    tracing::info!(chapters = arc.chapters.len(), "arc generated");
    Ok(arc)
}
