//! CRUD operations for chapters, including the atomic
//! chapter-insert-plus-progress-update commit.

use super::stories::{parse_ts, to_json};
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::{Chapter, ChapterSummary, GenerationProgress, StoryStatus};
use chrono::{DateTime, Utc};

#[derive(Debug, sqlx::FromRow)]
struct ChapterRow {
    id: String,
    story_id: String,
    chapter_number: i64,
    title: String,
    content: String,
    word_count: i64,
    quality_score: Option<f64>,
    regeneration_count: i64,
    quality_review: Option<String>,
    constraint_report: Option<String>,
    opening_hook: String,
    closing_hook: String,
    key_events: String,
    flagged: i64,
    created_at: String,
    revised_at: Option<String>,
}

impl ChapterRow {
    fn into_chapter(self) -> Result<Chapter, StorageError> {
        let key_events: Vec<String> = serde_json::from_str(&self.key_events).map_err(|e| {
            StorageError::ConstraintViolation {
                message: format!("malformed key_events blob: {e}"),
            }
        })?;
        let parse_opt_json = |raw: Option<String>| -> Result<Option<serde_json::Value>, StorageError> {
            raw.map(|r| {
                serde_json::from_str(&r).map_err(|e| StorageError::ConstraintViolation {
                    message: format!("malformed review blob: {e}"),
                })
            })
            .transpose()
        };
        Ok(Chapter {
            id: self.id,
            story_id: self.story_id,
            chapter_number: self.chapter_number as u32,
            title: self.title,
            content: self.content,
            word_count: self.word_count as u32,
            quality_score: self.quality_score,
            regeneration_count: self.regeneration_count as u32,
            quality_review: parse_opt_json(self.quality_review)?,
            constraint_report: parse_opt_json(self.constraint_report)?,
            opening_hook: self.opening_hook,
            closing_hook: self.closing_hook,
            key_events,
            flagged: self.flagged != 0,
            created_at: parse_ts(&self.created_at)?,
            revised_at: self.revised_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

const CHAPTER_COLUMNS: &str = "id, story_id, chapter_number, title, content, word_count, \
     quality_score, regeneration_count, quality_review, constraint_report, \
     opening_hook, closing_hook, key_events, flagged, created_at, revised_at";

/// Commit a chapter and the "chapter done" progress update in one transaction.
///
/// Both writes land or neither does; a partially committed batch is the
/// failure mode the sweeper is designed to recover, so it must never exist.
/// The progress update is a compare-and-swap on `(current_step, updated_at)`;
/// a miss (or a pre-existing chapter in the slot) rolls everything back and
/// returns `false`.
pub async fn commit_chapter_with_progress(
    pool: &DbPool,
    chapter: &Chapter,
    expected_step: &str,
    expected_updated_at: DateTime<Utc>,
    progress: &GenerationProgress,
    status: StoryStatus,
) -> Result<bool, StorageError> {
    let key_events = to_json(&chapter.key_events)?;
    let quality_review = chapter.quality_review.as_ref().map(to_json).transpose()?;
    let constraint_report = chapter.constraint_report.as_ref().map(to_json).transpose()?;
    let progress_blob = to_json(progress)?;

    let mut tx = pool.begin().await.map_err(query_err)?;

    let inserted = sqlx::query(
        "INSERT OR IGNORE INTO chapters \
         (id, story_id, chapter_number, title, content, word_count, quality_score, \
          regeneration_count, quality_review, constraint_report, opening_hook, closing_hook, \
          key_events, flagged, created_at, revised_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&chapter.id)
    .bind(&chapter.story_id)
    .bind(chapter.chapter_number)
    .bind(&chapter.title)
    .bind(&chapter.content)
    .bind(chapter.word_count)
    .bind(chapter.quality_score)
    .bind(chapter.regeneration_count)
    .bind(quality_review)
    .bind(constraint_report)
    .bind(&chapter.opening_hook)
    .bind(&chapter.closing_hook)
    .bind(key_events)
    .bind(i64::from(chapter.flagged))
    .bind(chapter.created_at.to_rfc3339())
    .bind(chapter.revised_at.map(|t| t.to_rfc3339()))
    .execute(&mut *tx)
    .await
    .map_err(query_err)?;

    if inserted.rows_affected() != 1 {
        // Slot already taken: another writer committed this chapter.
        tx.rollback().await.map_err(query_err)?;
        return Ok(false);
    }

    let swapped = sqlx::query(
        "UPDATE stories SET generation_progress = ?, current_step = ?, status = ?, updated_at = ? \
         WHERE id = ? AND current_step = ? AND updated_at = ?",
    )
    .bind(progress_blob)
    .bind(progress.current_step.as_tag())
    .bind(status.as_tag())
    .bind(progress.last_updated.to_rfc3339())
    .bind(&chapter.story_id)
    .bind(expected_step)
    .bind(expected_updated_at.to_rfc3339())
    .execute(&mut *tx)
    .await
    .map_err(query_err)?;

    if swapped.rows_affected() != 1 {
        tx.rollback().await.map_err(query_err)?;
        return Ok(false);
    }

    tx.commit().await.map_err(query_err)?;
    Ok(true)
}

/// Fetch one chapter by story and number.
pub async fn get_chapter(
    pool: &DbPool,
    story_id: &str,
    chapter_number: u32,
) -> Result<Option<Chapter>, StorageError> {
    let row: Option<ChapterRow> = sqlx::query_as(&format!(
        "SELECT {CHAPTER_COLUMNS} FROM chapters WHERE story_id = ? AND chapter_number = ?"
    ))
    .bind(story_id)
    .bind(chapter_number)
    .fetch_optional(pool)
    .await
    .map_err(query_err)?;
    row.map(ChapterRow::into_chapter).transpose()
}

/// Whether a chapter exists in the given slot.
pub async fn chapter_exists(
    pool: &DbPool,
    story_id: &str,
    chapter_number: u32,
) -> Result<bool, StorageError> {
    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM chapters WHERE story_id = ? AND chapter_number = ?")
            .bind(story_id)
            .bind(chapter_number)
            .fetch_one(pool)
            .await
            .map_err(query_err)?;
    Ok(count.0 > 0)
}

/// Chapters in `[start, end]`, ordered by chapter number.
pub async fn chapters_in_range(
    pool: &DbPool,
    story_id: &str,
    start: u32,
    end: u32,
) -> Result<Vec<Chapter>, StorageError> {
    let rows: Vec<ChapterRow> = sqlx::query_as(&format!(
        "SELECT {CHAPTER_COLUMNS} FROM chapters \
         WHERE story_id = ? AND chapter_number BETWEEN ? AND ? \
         ORDER BY chapter_number"
    ))
    .bind(story_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;
    rows.into_iter().map(ChapterRow::into_chapter).collect()
}

/// Existence count used for idempotency ("do chapters 4..6 already exist?").
pub async fn count_chapters_in_range(
    pool: &DbPool,
    story_id: &str,
    start: u32,
    end: u32,
) -> Result<u32, StorageError> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM chapters WHERE story_id = ? AND chapter_number BETWEEN ? AND ?",
    )
    .bind(story_id)
    .bind(start)
    .bind(end)
    .fetch_one(pool)
    .await
    .map_err(query_err)?;
    Ok(count.0 as u32)
}

/// Total committed chapters for a story.
pub async fn count_chapters(pool: &DbPool, story_id: &str) -> Result<u32, StorageError> {
    count_chapters_in_range(pool, story_id, 1, crate::story::CHAPTER_COUNT).await
}

/// Replace chapter content after a surgical revision.
pub async fn update_chapter_content(
    pool: &DbPool,
    chapter_id: &str,
    content: &str,
    word_count: u32,
    revised_at: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE chapters SET content = ?, word_count = ?, revised_at = ? WHERE id = ?")
        .bind(content)
        .bind(word_count)
        .bind(revised_at.to_rfc3339())
        .bind(chapter_id)
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

/// Compact summaries of all committed chapters, ordered by number.
pub async fn list_summaries(
    pool: &DbPool,
    story_id: &str,
) -> Result<Vec<ChapterSummary>, StorageError> {
    let rows: Vec<(i64, String, i64, Option<f64>, i64)> = sqlx::query_as(
        "SELECT chapter_number, title, word_count, quality_score, flagged \
         FROM chapters WHERE story_id = ? ORDER BY chapter_number",
    )
    .bind(story_id)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;

    Ok(rows
        .into_iter()
        .map(
            |(chapter_number, title, word_count, quality_score, flagged)| ChapterSummary {
                chapter_number: chapter_number as u32,
                title,
                word_count: word_count as u32,
                quality_score,
                flagged: flagged != 0,
            },
        )
        .collect())
}
