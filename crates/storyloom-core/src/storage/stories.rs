//! CRUD operations for story rows, including the compare-and-swap
//! progress update that enforces single-writer progression.

use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::{GenerationProgress, Premise, Story, StoryStatus};
use chrono::{DateTime, Utc};

/// Raw story row as stored.
#[derive(Debug, sqlx::FromRow)]
struct StoryRow {
    id: String,
    user_id: String,
    title: String,
    genre: String,
    status: String,
    premise: String,
    generation_progress: String,
    series_id: Option<String>,
    book_number: Option<i64>,
    cover_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StoryRow {
    fn into_story(self) -> Result<Story, StorageError> {
        let status = StoryStatus::parse(&self.status).ok_or_else(|| {
            StorageError::ConstraintViolation {
                message: format!("unknown story status '{}'", self.status),
            }
        })?;
        let premise: Premise =
            serde_json::from_str(&self.premise).map_err(|e| StorageError::ConstraintViolation {
                message: format!("malformed premise blob: {e}"),
            })?;
        let progress: GenerationProgress = serde_json::from_str(&self.generation_progress)
            .map_err(|e| StorageError::ConstraintViolation {
                message: format!("malformed generation_progress blob: {e}"),
            })?;
        Ok(Story {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            genre: self.genre,
            status,
            premise,
            progress,
            series_id: self.series_id,
            book_number: self.book_number,
            cover_url: self.cover_url,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::ConstraintViolation {
            message: format!("malformed timestamp '{raw}': {e}"),
        })
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(|e| StorageError::ConstraintViolation {
        message: format!("failed to serialize value: {e}"),
    })
}

const STORY_COLUMNS: &str = "id, user_id, title, genre, status, premise, generation_progress, \
     series_id, book_number, cover_url, created_at, updated_at";

/// Insert a new story row.
pub async fn insert_story(pool: &DbPool, story: &Story) -> Result<(), StorageError> {
    let premise = to_json(&story.premise)?;
    let progress = to_json(&story.progress)?;

    sqlx::query(
        "INSERT INTO stories \
         (id, user_id, title, genre, status, premise, current_step, generation_progress, \
          series_id, book_number, cover_url, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&story.id)
    .bind(&story.user_id)
    .bind(&story.title)
    .bind(&story.genre)
    .bind(story.status.as_tag())
    .bind(premise)
    .bind(story.progress.current_step.as_tag())
    .bind(progress)
    .bind(&story.series_id)
    .bind(story.book_number)
    .bind(&story.cover_url)
    .bind(story.created_at.to_rfc3339())
    .bind(story.updated_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Fetch a story by id.
pub async fn get_story(pool: &DbPool, story_id: &str) -> Result<Option<Story>, StorageError> {
    let row: Option<StoryRow> =
        sqlx::query_as(&format!("SELECT {STORY_COLUMNS} FROM stories WHERE id = ?"))
            .bind(story_id)
            .fetch_optional(pool)
            .await
            .map_err(query_err)?;
    row.map(StoryRow::into_story).transpose()
}

/// List a user's stories, newest first.
pub async fn list_stories(pool: &DbPool, user_id: &str) -> Result<Vec<Story>, StorageError> {
    let rows: Vec<StoryRow> = sqlx::query_as(&format!(
        "SELECT {STORY_COLUMNS} FROM stories WHERE user_id = ? ORDER BY created_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;
    rows.into_iter().map(StoryRow::into_story).collect()
}

/// All stories currently in a `generating_*` step with `status = generating`.
///
/// The sweeper applies staleness and circuit-breaker logic on top.
pub async fn list_generating_stories(pool: &DbPool) -> Result<Vec<Story>, StorageError> {
    let rows: Vec<StoryRow> = sqlx::query_as(&format!(
        "SELECT {STORY_COLUMNS} FROM stories \
         WHERE status = 'generating' AND current_step LIKE 'generating_%' \
         ORDER BY updated_at ASC"
    ))
    .fetch_all(pool)
    .await
    .map_err(query_err)?;
    rows.into_iter().map(StoryRow::into_story).collect()
}

/// Compare-and-swap update of a story's progress blob and status.
///
/// Succeeds only if the stored `(current_step, updated_at)` pair still
/// matches what the caller read; a miss means another writer owns the story
/// and the caller must back off. Returns whether the swap happened.
pub async fn update_progress_cas(
    pool: &DbPool,
    story_id: &str,
    expected_step: &str,
    expected_updated_at: DateTime<Utc>,
    progress: &GenerationProgress,
    status: StoryStatus,
) -> Result<bool, StorageError> {
    let blob = to_json(progress)?;

    let result = sqlx::query(
        "UPDATE stories SET generation_progress = ?, current_step = ?, status = ?, updated_at = ? \
         WHERE id = ? AND current_step = ? AND updated_at = ?",
    )
    .bind(blob)
    .bind(progress.current_step.as_tag())
    .bind(status.as_tag())
    .bind(progress.last_updated.to_rfc3339())
    .bind(story_id)
    .bind(expected_step)
    .bind(expected_updated_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;

    Ok(result.rows_affected() == 1)
}

/// Unconditional status update (terminal transitions like `abandoned`).
pub async fn update_status(
    pool: &DbPool,
    story_id: &str,
    status: StoryStatus,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE stories SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_tag())
        .bind(now.to_rfc3339())
        .bind(story_id)
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

/// Record the cover image URL produced by the external cover service.
pub async fn set_cover_url(
    pool: &DbPool,
    story_id: &str,
    cover_url: &str,
) -> Result<(), StorageError> {
    sqlx::query("UPDATE stories SET cover_url = ? WHERE id = ?")
        .bind(cover_url)
        .bind(story_id)
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;
    use crate::story::{GenerationStep, PremiseTier};

    /// A minimal story in the initial state.
    pub fn story(id: &str, user_id: &str) -> Story {
        let now = Utc::now();
        Story {
            id: id.to_string(),
            user_id: user_id.to_string(),
            title: "The Tide Keeper".to_string(),
            genre: "fantasy".to_string(),
            status: StoryStatus::Generating,
            premise: Premise {
                title: "The Tide Keeper".to_string(),
                description: "A lighthouse keeper discovers the tide obeys her.".to_string(),
                hook: "What if the sea kept secrets on purpose?".to_string(),
                genre: "fantasy".to_string(),
                themes: vec!["belonging".to_string()],
                tier: PremiseTier::Comfort,
            },
            progress: GenerationProgress::new(now),
            series_id: None,
            book_number: None,
            cover_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Story with its step forced to `step`.
    pub fn story_at_step(id: &str, user_id: &str, step: GenerationStep) -> Story {
        let mut s = story(id, user_id);
        s.progress.current_step = step;
        s
    }
}

#[cfg(test)]
mod tests {
    use super::test_fixtures::story;
    use super::*;
    use crate::storage::init_test_db;
    use crate::story::GenerationStep;

    #[tokio::test]
    async fn insert_and_get_round_trip() {
        let pool = init_test_db().await.expect("init db");
        let s = story("s1", "u1");
        insert_story(&pool, &s).await.expect("insert");

        let loaded = get_story(&pool, "s1").await.expect("get").expect("some");
        assert_eq!(loaded.title, "The Tide Keeper");
        assert_eq!(loaded.status, StoryStatus::Generating);
        assert_eq!(
            loaded.progress.current_step,
            GenerationStep::GeneratingBible
        );
        assert_eq!(loaded.premise.hook, s.premise.hook);
    }

    #[tokio::test]
    async fn get_missing_story_is_none() {
        let pool = init_test_db().await.expect("init db");
        assert!(get_story(&pool, "nope").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn cas_succeeds_then_misses_on_stale_read() {
        let pool = init_test_db().await.expect("init db");
        let s = story("s1", "u1");
        insert_story(&pool, &s).await.expect("insert");

        let mut progress = s.progress.clone();
        progress.advance(GenerationStep::GeneratingArc, Utc::now());

        let swapped = update_progress_cas(
            &pool,
            "s1",
            "generating_bible",
            s.updated_at,
            &progress,
            StoryStatus::Generating,
        )
        .await
        .expect("cas");
        assert!(swapped);

        // A second writer holding the original read must miss.
        let mut stale = s.progress.clone();
        stale.advance(GenerationStep::GeneratingChapter(1), Utc::now());
        let swapped = update_progress_cas(
            &pool,
            "s1",
            "generating_bible",
            s.updated_at,
            &stale,
            StoryStatus::Generating,
        )
        .await
        .expect("cas");
        assert!(!swapped);

        let loaded = get_story(&pool, "s1").await.expect("get").expect("some");
        assert_eq!(loaded.progress.current_step, GenerationStep::GeneratingArc);
    }

    #[tokio::test]
    async fn list_generating_excludes_awaiting_and_terminal() {
        let pool = init_test_db().await.expect("init db");

        insert_story(&pool, &story("s1", "u1")).await.expect("insert");

        let mut awaiting = story("s2", "u1");
        awaiting.progress.current_step = GenerationStep::AwaitingFeedback(2);
        insert_story(&pool, &awaiting).await.expect("insert");

        let mut failed = story("s3", "u1");
        failed.progress.current_step = GenerationStep::PermanentlyFailed;
        failed.status = StoryStatus::Error;
        insert_story(&pool, &failed).await.expect("insert");

        let generating = list_generating_stories(&pool).await.expect("list");
        let ids: Vec<&str> = generating.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);
    }

    #[tokio::test]
    async fn status_update_and_cover_url() {
        let pool = init_test_db().await.expect("init db");
        insert_story(&pool, &story("s1", "u1")).await.expect("insert");

        update_status(&pool, "s1", StoryStatus::Abandoned, Utc::now())
            .await
            .expect("status");
        set_cover_url(&pool, "s1", "https://covers.example/s1.png")
            .await
            .expect("cover");

        let loaded = get_story(&pool, "s1").await.expect("get").expect("some");
        assert_eq!(loaded.status, StoryStatus::Abandoned);
        assert_eq!(
            loaded.cover_url.as_deref(),
            Some("https://covers.example/s1.png")
        );
    }
}
