//! Post-commit entity extraction and ledger appends.
//!
//! A separate extraction pass reads the committed chapter and records up
//! to 50 entity facts plus one character-ledger and one world-ledger entry
//! for future chapters to consume. Extraction failures never un-commit a
//! chapter; they are logged and the pipeline moves on with less context.

use super::{complete_structured, PipelineError};
use crate::llm::{GenerationParams, LlmGateway};
use crate::storage::entities::MAX_ENTITIES_PER_CHAPTER;
use crate::storage::ledgers::Ledger;
use crate::storage::{entities as entity_store, ledgers, DbPool};
use crate::story::{Chapter, ChapterEntity, EntityType};
use chrono::Utc;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RawEntity {
    entity_type: EntityType,
    entity_name: String,
    fact: String,
    #[serde(default)]
    source_quote: String,
}

#[derive(Debug, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    character_ledger: serde_json::Value,
    #[serde(default)]
    world_ledger: serde_json::Value,
}

const EXTRACTION_SYSTEM: &str = "You are a story canon librarian. You extract durable facts \
from a chapter so later chapters stay consistent. You respond with JSON only.";

fn extraction_prompt(chapter: &Chapter) -> String {
    format!(
        "CHAPTER {n}: {title}\n\n{content}\n\n\
         Extract up to {cap} durable facts as entities. entity_type is one of character, \
         location, world_rule, timeline, plot_thread. Each fact needs a short source_quote.\n\
         Also produce two ledger entries:\n\
         - character_ledger: an object mapping character names to their state at chapter end \
         (injuries, relationships, knowledge).\n\
         - world_ledger: an object recording revealed rules, changed places, and timeline \
         movement.\n\
         Respond with a JSON object {{\"entities\": [{{\"entity_type\", \"entity_name\", \
         \"fact\", \"source_quote\"}}], \"character_ledger\": {{}}, \"world_ledger\": {{}}}}.",
        n = chapter.chapter_number,
        title = chapter.title,
        content = chapter.content,
        cap = MAX_ENTITIES_PER_CHAPTER,
    )
}

/// Extract entities from a committed chapter and append the ledgers.
///
/// Returns the number of entities recorded. Never fails the pipeline:
/// errors are logged and swallowed.
pub async fn extract_and_record(
    db: &DbPool,
    gateway: &LlmGateway,
    user_id: &str,
    chapter: &Chapter,
) -> usize {
    let raw: Result<RawExtraction, PipelineError> = complete_structured(
        db,
        gateway,
        user_id,
        "entity_extraction",
        EXTRACTION_SYSTEM,
        &extraction_prompt(chapter),
        &GenerationParams {
            max_tokens: 4096,
            temperature: 0.0,
            system_prompt: None,
        },
        "object with 'entities', 'character_ledger', 'world_ledger'",
    )
    .await;

    let raw = match raw {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(
                chapter = chapter.chapter_number,
                error = %e,
                "entity extraction failed, continuing without it"
            );
            return 0;
        }
    };

    let entities: Vec<ChapterEntity> = raw
        .entities
        .into_iter()
        .take(MAX_ENTITIES_PER_CHAPTER)
        .map(|e| ChapterEntity {
            chapter_id: chapter.id.clone(),
            story_id: chapter.story_id.clone(),
            chapter_number: chapter.chapter_number,
            entity_type: e.entity_type,
            entity_name: e.entity_name,
            fact: e.fact,
            source_quote: e.source_quote,
            is_consistent: true,
        })
        .collect();
    let recorded = entities.len();

    if let Err(e) = entity_store::insert_entities(db, &entities).await {
        tracing::warn!(error = %e, "failed to store chapter entities");
    }

    let now = Utc::now();
    for (ledger, entry) in [
        (Ledger::Character, &raw.character_ledger),
        (Ledger::World, &raw.world_ledger),
    ] {
        if entry.is_null() {
            continue;
        }
        if let Err(e) = ledgers::append_entry(
            db,
            ledger,
            &chapter.story_id,
            chapter.chapter_number,
            entry,
            now,
        )
        .await
        {
            tracing::warn!(error = %e, ledger = ?ledger, "failed to append ledger entry");
        }
    }

    tracing::debug!(
        chapter = chapter.chapter_number,
        entities = recorded,
        "entities recorded"
    );
    recorded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::test_support::{gateway, ScriptedProvider};
    use crate::storage::chapters::test_fixtures::chapter;
    use crate::storage::chapters::commit_chapter_with_progress;
    use crate::storage::stories::test_fixtures::story_at_step;
    use crate::storage::stories::insert_story;
    use crate::storage::init_test_db;
    use crate::story::{GenerationStep, StoryStatus};
    use std::sync::Arc;

    async fn committed_chapter(pool: &DbPool) -> Chapter {
        let s = story_at_step("s1", "u1", GenerationStep::GeneratingChapter(1));
        insert_story(pool, &s).await.expect("story");
        let ch = chapter("s1", 1);
        let mut progress = s.progress.clone();
        progress.advance(GenerationStep::GeneratingChapter(2), Utc::now());
        assert!(commit_chapter_with_progress(
            pool,
            &ch,
            "generating_chapter_1",
            s.updated_at,
            &progress,
            StoryStatus::Generating,
        )
        .await
        .expect("commit"));
        ch
    }

    fn extraction_json() -> String {
        serde_json::json!({
            "entities": [
                {"entity_type": "character", "entity_name": "Mara",
                 "fact": "Mara cut her palm on the reef", "source_quote": "her palm opened"},
                {"entity_type": "world_rule", "entity_name": "the tide",
                 "fact": "the tide pauses at moonrise", "source_quote": "the sea held its breath"}
            ],
            "character_ledger": {"Mara": "injured left palm, suspects Hollis"},
            "world_ledger": {"tide": "pauses at moonrise"}
        })
        .to_string()
    }

    #[tokio::test]
    async fn records_entities_and_both_ledgers() {
        let pool = init_test_db().await.expect("db");
        let ch = committed_chapter(&pool).await;
        let provider = Arc::new(ScriptedProvider::always(&extraction_json()));

        let recorded = extract_and_record(&pool, &gateway(provider), "u1", &ch).await;
        assert_eq!(recorded, 2);

        let entities = entity_store::entities_for_story(&pool, "s1", 12)
            .await
            .expect("entities");
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_type, EntityType::Character);

        for ledger in [Ledger::Character, Ledger::World] {
            let entries = ledgers::recent_entries(&pool, ledger, "s1", 5)
                .await
                .expect("entries");
            assert_eq!(entries.len(), 1);
        }
    }

    #[tokio::test]
    async fn extraction_failure_is_swallowed() {
        let pool = init_test_db().await.expect("db");
        let ch = committed_chapter(&pool).await;
        let provider = Arc::new(ScriptedProvider::always("not json"));

        let recorded = extract_and_record(&pool, &gateway(provider), "u1", &ch).await;
        assert_eq!(recorded, 0);
    }

    #[tokio::test]
    async fn entity_overflow_is_capped() {
        let pool = init_test_db().await.expect("db");
        let ch = committed_chapter(&pool).await;

        let many: Vec<serde_json::Value> = (0..70)
            .map(|i| {
                serde_json::json!({
                    "entity_type": "plot_thread", "entity_name": format!("thread {i}"),
                    "fact": "f", "source_quote": "q"
                })
            })
            .collect();
        let body = serde_json::json!({
            "entities": many,
            "character_ledger": {},
            "world_ledger": {}
        });
        let provider = Arc::new(ScriptedProvider::always(&body.to_string()));

        let recorded = extract_and_record(&pool, &gateway(provider), "u1", &ch).await;
        assert_eq!(recorded, MAX_ENTITIES_PER_CHAPTER);
    }
}
