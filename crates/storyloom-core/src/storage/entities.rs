//! Storage for per-chapter extracted entities.

use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::{ChapterEntity, EntityType};

/// Hard cap on entities stored per chapter.
pub const MAX_ENTITIES_PER_CHAPTER: usize = 50;

/// Insert the entities extracted from one chapter, capped at
/// [`MAX_ENTITIES_PER_CHAPTER`].
pub async fn insert_entities(
    pool: &DbPool,
    entities: &[ChapterEntity],
) -> Result<(), StorageError> {
    for entity in entities.iter().take(MAX_ENTITIES_PER_CHAPTER) {
        sqlx::query(
            "INSERT INTO chapter_entities \
             (chapter_id, story_id, chapter_number, entity_type, entity_name, fact, \
              source_quote, is_consistent) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entity.chapter_id)
        .bind(&entity.story_id)
        .bind(entity.chapter_number)
        .bind(entity.entity_type.as_tag())
        .bind(&entity.entity_name)
        .bind(&entity.fact)
        .bind(&entity.source_quote)
        .bind(i64::from(entity.is_consistent))
        .execute(pool)
        .await
        .map_err(query_err)?;
    }
    Ok(())
}

/// All entities for a story up to and including `max_chapter`, ordered by
/// chapter then insertion.
pub async fn entities_for_story(
    pool: &DbPool,
    story_id: &str,
    max_chapter: u32,
) -> Result<Vec<ChapterEntity>, StorageError> {
    let rows: Vec<(String, String, i64, String, String, String, String, i64)> = sqlx::query_as(
        "SELECT chapter_id, story_id, chapter_number, entity_type, entity_name, fact, \
                source_quote, is_consistent \
         FROM chapter_entities \
         WHERE story_id = ? AND chapter_number <= ? \
         ORDER BY chapter_number, id",
    )
    .bind(story_id)
    .bind(max_chapter)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;

    rows.into_iter()
        .map(
            |(chapter_id, story_id, chapter_number, entity_type, entity_name, fact, source_quote, is_consistent)| {
                let entity_type = EntityType::parse(&entity_type).ok_or_else(|| {
                    StorageError::ConstraintViolation {
                        message: format!("unknown entity type '{entity_type}'"),
                    }
                })?;
                Ok(ChapterEntity {
                    chapter_id,
                    story_id,
                    chapter_number: chapter_number as u32,
                    entity_type,
                    entity_name,
                    fact,
                    source_quote,
                    is_consistent: is_consistent != 0,
                })
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::chapters::test_fixtures::chapter;
    use crate::storage::chapters::commit_chapter_with_progress;
    use crate::storage::stories::test_fixtures::story_at_step;
    use crate::storage::stories::insert_story;
    use crate::storage::init_test_db;
    use crate::story::{GenerationStep, StoryStatus};
    use chrono::Utc;

    fn entity(n: u32, name: &str) -> ChapterEntity {
        ChapterEntity {
            chapter_id: format!("s1-ch{n}"),
            story_id: "s1".to_string(),
            chapter_number: n,
            entity_type: EntityType::Character,
            entity_name: name.to_string(),
            fact: format!("{name} appears in chapter {n}"),
            source_quote: "quote".to_string(),
            is_consistent: true,
        }
    }

    async fn setup() -> DbPool {
        let pool = init_test_db().await.expect("init db");
        let s = story_at_step("s1", "u1", GenerationStep::GeneratingChapter(1));
        insert_story(&pool, &s).await.expect("story");
        let mut progress = s.progress.clone();
        progress.advance(GenerationStep::GeneratingChapter(2), Utc::now());
        assert!(commit_chapter_with_progress(
            &pool,
            &chapter("s1", 1),
            "generating_chapter_1",
            s.updated_at,
            &progress,
            StoryStatus::Generating,
        )
        .await
        .expect("commit"));
        pool
    }

    #[tokio::test]
    async fn insert_and_query_by_chapter_bound() {
        let pool = setup().await;

        insert_entities(&pool, &[entity(1, "Mara"), entity(1, "Tobin")])
            .await
            .expect("insert");

        let entities = entities_for_story(&pool, "s1", 1).await.expect("query");
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_name, "Mara");

        let none = entities_for_story(&pool, "s1", 0).await.expect("query");
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn cap_is_enforced() {
        let pool = setup().await;

        let many: Vec<ChapterEntity> = (0..60).map(|i| entity(1, &format!("c{i}"))).collect();
        insert_entities(&pool, &many).await.expect("insert");

        let entities = entities_for_story(&pool, "s1", 12).await.expect("query");
        assert_eq!(entities.len(), MAX_ENTITIES_PER_CHAPTER);
    }
}
