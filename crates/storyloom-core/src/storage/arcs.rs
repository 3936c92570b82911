//! Storage for arc outlines. One current arc per story (arc_number 1 for
//! standalone books; series sequels bump the number).

use super::stories::to_json;
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::ArcOutline;
use chrono::{DateTime, Utc};

/// Insert an arc. Ignored if the (story, arc_number) slot is taken; arcs
/// are write-once like bibles.
pub async fn put_arc(
    pool: &DbPool,
    story_id: &str,
    arc_number: u32,
    arc: &ArcOutline,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let data = to_json(arc)?;
    sqlx::query(
        "INSERT OR IGNORE INTO arcs (story_id, arc_number, data, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(story_id)
    .bind(arc_number)
    .bind(data)
    .bind(now.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Fetch the story's current arc (highest arc number).
pub async fn get_current_arc(
    pool: &DbPool,
    story_id: &str,
) -> Result<Option<ArcOutline>, StorageError> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT data FROM arcs WHERE story_id = ? ORDER BY arc_number DESC LIMIT 1",
    )
    .bind(story_id)
    .fetch_optional(pool)
    .await
    .map_err(query_err)?;
    row.map(|(data,)| {
        serde_json::from_str(&data).map_err(|e| StorageError::ConstraintViolation {
            message: format!("malformed arc blob: {e}"),
        })
    })
    .transpose()
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::arc;
    use super::*;
    use crate::storage::stories::test_fixtures::story;
    use crate::storage::stories::insert_story;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn put_and_get_round_trip() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        put_arc(&pool, "s1", 1, &arc(), Utc::now()).await.expect("put");
        let loaded = get_current_arc(&pool, "s1").await.expect("get").expect("some");
        assert_eq!(loaded.chapters.len(), 12);
        assert_eq!(loaded.chapter(6).expect("ch6").key_revelations.len(), 1);
    }

    #[tokio::test]
    async fn highest_arc_number_wins() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        put_arc(&pool, "s1", 1, &arc(), Utc::now()).await.expect("put");
        let mut second = arc();
        second.chapters[0].title = "Book Two Opens".to_string();
        put_arc(&pool, "s1", 2, &second, Utc::now()).await.expect("put");

        let loaded = get_current_arc(&pool, "s1").await.expect("get").expect("some");
        assert_eq!(loaded.chapters[0].title, "Book Two Opens");
    }

    #[tokio::test]
    async fn missing_arc_is_none() {
        let pool = init_test_db().await.expect("init db");
        assert!(get_current_arc(&pool, "nope").await.expect("get").is_none());
    }
}
