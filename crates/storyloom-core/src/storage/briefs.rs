//! Storage for editor briefs, keyed by (story, batch start).
//!
//! Persisting the brief means a crash between feedback ingest and the
//! first chapter of the batch does not re-spend the brief LLM call.

use super::stories::to_json;
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::EditorBrief;
use chrono::{DateTime, Utc};

/// Store the brief for a batch. Write-once per (story, batch_start).
pub async fn put_brief(
    pool: &DbPool,
    story_id: &str,
    brief: &EditorBrief,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let blob = to_json(brief)?;
    sqlx::query(
        "INSERT OR IGNORE INTO editor_briefs (story_id, batch_start, brief, created_at) \
         VALUES (?, ?, ?, ?)",
    )
    .bind(story_id)
    .bind(brief.batch_start)
    .bind(blob)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Fetch the brief for a batch, if one was built.
pub async fn get_brief(
    pool: &DbPool,
    story_id: &str,
    batch_start: u32,
) -> Result<Option<EditorBrief>, StorageError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT brief FROM editor_briefs WHERE story_id = ? AND batch_start = ?",
    )
    .bind(story_id)
    .bind(batch_start)
    .fetch_optional(pool)
    .await
    .map_err(query_err)?;
    row.map(|(blob,)| {
        serde_json::from_str(&blob).map_err(|e| StorageError::ConstraintViolation {
            message: format!("malformed editor brief blob: {e}"),
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stories::test_fixtures::story;
    use crate::storage::stories::insert_story;
    use crate::storage::init_test_db;
    use crate::story::RevisedOutline;

    fn brief() -> EditorBrief {
        EditorBrief {
            batch_start: 4,
            revised_outlines: (4..=6)
                .map(|n| RevisedOutline {
                    chapter_number: n,
                    events_summary: format!("revised events for {n}"),
                    editor_notes: "pick up the pace in Mara's scenes".to_string(),
                })
                .collect(),
            style_example: "Mara took the stairs two at a time.".to_string(),
        }
    }

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        put_brief(&pool, "s1", &brief(), Utc::now()).await.expect("put");
        let loaded = get_brief(&pool, "s1", 4).await.expect("get").expect("some");
        assert_eq!(loaded, brief());
    }

    #[tokio::test]
    async fn brief_is_write_once_per_batch() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        put_brief(&pool, "s1", &brief(), Utc::now()).await.expect("put");
        let mut altered = brief();
        altered.style_example = "Different voice.".to_string();
        put_brief(&pool, "s1", &altered, Utc::now()).await.expect("put again");

        let loaded = get_brief(&pool, "s1", 4).await.expect("get").expect("some");
        assert_eq!(loaded.style_example, "Mara took the stairs two at a time.");
    }

    #[tokio::test]
    async fn missing_brief_is_none() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");
        assert!(get_brief(&pool, "s1", 7).await.expect("get").is_none());
    }
}
