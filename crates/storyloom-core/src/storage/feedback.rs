//! Storage for checkpoint feedback. Upserts on `(user, story, checkpoint)`.

use super::stories::{parse_ts, to_json};
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::{Checkpoint, CheckpointFeedback, FeedbackPayload};

/// Upsert a feedback row on the `(user, story, checkpoint)` conflict key.
///
/// A re-submission replaces the payload and timestamp.
pub async fn upsert_feedback(
    pool: &DbPool,
    feedback: &CheckpointFeedback,
) -> Result<(), StorageError> {
    let payload = to_json(&feedback.payload)?;
    sqlx::query(
        "INSERT INTO checkpoint_feedback (user_id, story_id, checkpoint, payload, created_at) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT (user_id, story_id, checkpoint) \
         DO UPDATE SET payload = excluded.payload, created_at = excluded.created_at",
    )
    .bind(&feedback.user_id)
    .bind(&feedback.story_id)
    .bind(feedback.checkpoint.as_tag())
    .bind(payload)
    .bind(feedback.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

fn row_to_feedback(
    (user_id, story_id, checkpoint, payload, created_at): (String, String, String, String, String),
) -> Result<CheckpointFeedback, StorageError> {
    let checkpoint =
        Checkpoint::parse(&checkpoint).ok_or_else(|| StorageError::ConstraintViolation {
            message: format!("unknown checkpoint '{checkpoint}'"),
        })?;
    let payload: FeedbackPayload =
        serde_json::from_str(&payload).map_err(|e| StorageError::ConstraintViolation {
            message: format!("malformed feedback payload: {e}"),
        })?;
    Ok(CheckpointFeedback {
        user_id,
        story_id,
        checkpoint,
        payload,
        created_at: parse_ts(&created_at)?,
    })
}

/// Fetch one feedback row.
pub async fn get_feedback(
    pool: &DbPool,
    user_id: &str,
    story_id: &str,
    checkpoint: Checkpoint,
) -> Result<Option<CheckpointFeedback>, StorageError> {
    let row: Option<(String, String, String, String, String)> = sqlx::query_as(
        "SELECT user_id, story_id, checkpoint, payload, created_at \
         FROM checkpoint_feedback WHERE user_id = ? AND story_id = ? AND checkpoint = ?",
    )
    .bind(user_id)
    .bind(story_id)
    .bind(checkpoint.as_tag())
    .fetch_optional(pool)
    .await
    .map_err(query_err)?;
    row.map(row_to_feedback).transpose()
}

/// The full committed feedback history for a story, oldest first.
pub async fn feedback_history(
    pool: &DbPool,
    story_id: &str,
) -> Result<Vec<CheckpointFeedback>, StorageError> {
    let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
        "SELECT user_id, story_id, checkpoint, payload, created_at \
         FROM checkpoint_feedback WHERE story_id = ? ORDER BY created_at, id",
    )
    .bind(story_id)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;
    rows.into_iter().map(row_to_feedback).collect()
}
