//! Story bible generation.
//!
//! One LLM pass from the selected premise to the canonical structured
//! description of the book. Validated for unique character names; one
//! corrective retry before the stage fails.

use super::{complete_structured, PipelineError};
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::DbPool;
use crate::story::{Bible, Premise};

const BIBLE_SYSTEM: &str = "You are a story architect building the canonical bible for a \
twelve-chapter serialized novel. You respond with JSON only.";

fn bible_prompt(premise: &Premise) -> String {
    format!(
        "PREMISE\nTitle: {title}\nGenre: {genre}\nDescription: {description}\nHook: {hook}\n\
         Themes: {themes}\n\n\
         Build the story bible. Character names must be unique; the protagonist's name is the \
         canonical spelling every chapter will use. Give each character internal contradictions \
         that can drive twelve chapters. Ground each key location in sensory details.\n\
         Respond with a JSON object {{\"protagonist\": {{\"name\", \"goals\", \"fears\", \
         \"voice\", \"contradictions\"}}, \"antagonist\": {{...}}, \"supporting\": [{{...}}], \
         \"world_rules\": [], \"central_conflict\", \"stakes\", \"themes\": [], \
         \"key_locations\": [{{\"name\", \"sensory_details\"}}], \"timeline\"}}.",
        title = premise.title,
        genre = premise.genre,
        description = premise.description,
        hook = premise.hook,
        themes = premise.themes.join(", "),
    )
}

/// Generate the bible for a story. The caller persists it.
pub async fn generate_bible(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    premise: &Premise,
) -> Result<Bible, PipelineError> {
    let params = GenerationParams {
        max_tokens: 4096,
        temperature: 0.8,
        system_prompt: None,
    };
    let expected = "object with protagonist, antagonist, supporting, world_rules, \
                    central_conflict, stakes, themes, key_locations, timeline";

    let bible: Bible = complete_structured(
        db,
        gateway,
        user_id,
        "bible",
        BIBLE_SYSTEM,
        &bible_prompt(premise),
        &params,
        expected,
    )
    .await?;

    if let Err(problem) = bible.validate() {
        tracing::warn!(error = %problem, "bible failed validation, retrying once");
        let retry_prompt = format!(
            "{}\n\nYour previous bible was rejected: {problem}. Fix that and respond again.",
            bible_prompt(premise)
        );
        let bible: Bible = complete_structured(
            db,
            gateway,
            user_id,
            "bible",
            BIBLE_SYSTEM,
            &retry_prompt,
            &params,
            expected,
        )
        .await?;
        bible.validate().map_err(PipelineError::stage)?;
        return Ok(bible);
    }

    tracing::info!(protagonist = %bible.protagonist.name, "bible generated");
    Ok(bible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{gateway, ScriptedProvider};
    use crate::storage::init_test_db;
    use crate::story::PremiseTier;
    use std::sync::Arc;

    fn premise() -> Premise {
        Premise {
            title: "The Tide Keeper".to_string(),
            description: "d".to_string(),
            hook: "h".to_string(),
            genre: "fantasy".to_string(),
            themes: vec!["belonging".to_string()],
            tier: PremiseTier::Comfort,
        }
    }

    fn bible_json(protagonist: &str, antagonist: &str) -> String {
        let character = |name: &str| {
            serde_json::json!({
                "name": name, "goals": "g", "fears": "f", "voice": "v", "contradictions": "c"
            })
        };
        serde_json::json!({
            "protagonist": character(protagonist),
            "antagonist": character(antagonist),
            "supporting": [character("Tobin")],
            "world_rules": ["the tide obeys no clock"],
            "central_conflict": "conflict",
            "stakes": "stakes",
            "themes": ["belonging"],
            "key_locations": [{"name": "Stair of Salt", "sensory_details": "wet stone"}],
            "timeline": "one storm season"
        })
        .to_string()
    }

    #[tokio::test]
    async fn generates_a_valid_bible() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::always(&bible_json("Mara", "Hollis")));

        let bible = generate_bible(&db, &gateway(provider), "u1", &premise())
            .await
            .expect("generate");
        assert_eq!(bible.protagonist.name, "Mara");
        assert!(bible.validate().is_ok());
    }

    #[tokio::test]
    async fn duplicate_names_trigger_one_retry() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(bible_json("Mara", "Mara")),
            Ok(bible_json("Mara", "Hollis")),
        ]));
        let gw = gateway(provider.clone());

        let bible = generate_bible(&db, &gw, "u1", &premise()).await.expect("generate");
        assert_eq!(bible.antagonist.name, "Hollis");
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn persistent_duplicates_fail_the_stage() {
        let db = init_test_db().await.expect("db");
        let provider = Arc::new(ScriptedProvider::always(&bible_json("Mara", "Mara")));

        let err = generate_bible(&db, &gateway(provider), "u1", &premise())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Stage { .. }));
    }
}
