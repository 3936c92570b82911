//! Storage for story bibles. One row per story, written once.

use super::stories::to_json;
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::Bible;
use chrono::{DateTime, Utc};

/// Insert the bible for a story. Ignored if one already exists; the bible
/// is immutable once written.
pub async fn put_bible(
    pool: &DbPool,
    story_id: &str,
    bible: &Bible,
    now: DateTime<Utc>,
) -> Result<(), StorageError> {
    let data = to_json(bible)?;
    sqlx::query("INSERT OR IGNORE INTO bibles (story_id, data, created_at) VALUES (?, ?, ?)")
        .bind(story_id)
        .bind(data)
        .bind(now.to_rfc3339())
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

/// Fetch the bible for a story.
pub async fn get_bible(pool: &DbPool, story_id: &str) -> Result<Option<Bible>, StorageError> {
    let row: Option<(String,)> = sqlx::query_as("SELECT data FROM bibles WHERE story_id = ?")
        .bind(story_id)
        .fetch_optional(pool)
        .await
        .map_err(query_err)?;
    row.map(|(data,)| {
        serde_json::from_str(&data).map_err(|e| StorageError::ConstraintViolation {
            message: format!("malformed bible blob: {e}"),
        })
    })
    .transpose()
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::story::{Bible, Character, Location};

    pub fn character(name: &str) -> Character {
        Character {
            name: name.to_string(),
            goals: "keep the light burning".to_string(),
            fears: "the open sea".to_string(),
            voice: "clipped, practical".to_string(),
            contradictions: "longs for the thing she fears".to_string(),
        }
    }

    pub fn bible() -> Bible {
        Bible {
            protagonist: character("Mara"),
            antagonist: character("Warden Hollis"),
            supporting: vec![character("Tobin")],
            world_rules: vec!["the tide obeys no clock".to_string()],
            central_conflict: "the lighthouse against the warden's quota".to_string(),
            stakes: "the village drowns if the light fails".to_string(),
            themes: vec!["belonging".to_string()],
            key_locations: vec![Location {
                name: "The Stair of Salt".to_string(),
                sensory_details: "wet stone, kelp reek, gull cries".to_string(),
            }],
            timeline: "one storm season".to_string(),
        }
    }
}
