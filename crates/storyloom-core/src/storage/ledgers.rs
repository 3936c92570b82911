//! Append-only character and world-state ledgers.
//!
//! One entry per chapter per ledger, written at chapter commit and read
//! back by the constraint extractor for later chapters.

use super::{query_err, DbPool};
use crate::error::StorageError;
use chrono::{DateTime, Utc};

/// Which ledger a call targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ledger {
    /// Character state: injuries, relationships, knowledge.
    Character,
    /// World state: revealed rules, changed places, timeline movement.
    World,
}

impl Ledger {
    fn table(self) -> &'static str {
        match self {
            Ledger::Character => "character_ledger",
            Ledger::World => "world_ledger",
        }
    }
}

/// A ledger entry keyed by chapter.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    /// Chapter the entry was written at.
    pub chapter_number: u32,
    /// Structured entry data.
    pub entry: serde_json::Value,
}

/// Append an entry. The `(story, chapter)` slot is unique; re-appends from
/// an idempotent replay are ignored.
pub async fn append_entry(
    pool: &DbPool,
    ledger: Ledger,
    story_id: &str,
    chapter_number: u32,
    entry: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} (story_id, chapter_number, entry, created_at) VALUES (?, ?, ?, ?)",
        ledger.table()
    );
    sqlx::query(&sql)
        .bind(story_id)
        .bind(chapter_number)
        .bind(entry.to_string())
        .bind(now.to_rfc3339())
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

/// The most recent `limit` entries, newest first.
pub async fn recent_entries(
    pool: &DbPool,
    ledger: Ledger,
    story_id: &str,
    limit: u32,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let sql = format!(
        "SELECT chapter_number, entry FROM {} WHERE story_id = ? ORDER BY chapter_number DESC LIMIT ?",
        ledger.table()
    );
    let rows: Vec<(i64, String)> = sqlx::query_as(&sql)
        .bind(story_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(query_err)?;

    rows.into_iter()
        .map(|(chapter_number, entry)| {
            let entry =
                serde_json::from_str(&entry).map_err(|e| StorageError::ConstraintViolation {
                    message: format!("malformed ledger entry: {e}"),
                })?;
            Ok(LedgerEntry {
                chapter_number: chapter_number as u32,
                entry,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::stories::test_fixtures::story;
    use crate::storage::stories::insert_story;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn append_and_read_back_newest_first() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        for n in 1..=3u32 {
            append_entry(
                &pool,
                Ledger::Character,
                "s1",
                n,
                &serde_json::json!({"mara": format!("state after {n}")}),
                Utc::now(),
            )
            .await
            .expect("append");
        }

        let entries = recent_entries(&pool, Ledger::Character, "s1", 2)
            .await
            .expect("read");
        let chapters: Vec<u32> = entries.iter().map(|e| e.chapter_number).collect();
        assert_eq!(chapters, vec![3, 2]);
    }

    #[tokio::test]
    async fn one_entry_per_chapter_per_ledger() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        let first = serde_json::json!({"v": 1});
        let second = serde_json::json!({"v": 2});
        append_entry(&pool, Ledger::World, "s1", 1, &first, Utc::now())
            .await
            .expect("append");
        append_entry(&pool, Ledger::World, "s1", 1, &second, Utc::now())
            .await
            .expect("append replay");

        let entries = recent_entries(&pool, Ledger::World, "s1", 10).await.expect("read");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entry, first);
    }

    #[tokio::test]
    async fn ledgers_are_independent() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("story");

        append_entry(
            &pool,
            Ledger::Character,
            "s1",
            1,
            &serde_json::json!({}),
            Utc::now(),
        )
        .await
        .expect("append");

        assert_eq!(
            recent_entries(&pool, Ledger::World, "s1", 10)
                .await
                .expect("read")
                .len(),
            0
        );
    }
}
