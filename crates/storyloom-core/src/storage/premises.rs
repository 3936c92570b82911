//! Storage for premise sets.

use super::stories::{parse_ts, to_json};
use super::{query_err, DbPool};
use crate::error::StorageError;
use crate::story::{Premise, PremiseSet};

/// Insert a premise set.
pub async fn insert_premise_set(pool: &DbPool, set: &PremiseSet) -> Result<(), StorageError> {
    let premises = to_json(&set.premises)?;
    sqlx::query(
        "INSERT INTO premise_sets (id, user_id, premises, status, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&set.id)
    .bind(&set.user_id)
    .bind(premises)
    .bind(&set.status)
    .bind(set.created_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Fetch a premise set by id.
pub async fn get_premise_set(
    pool: &DbPool,
    set_id: &str,
) -> Result<Option<PremiseSet>, StorageError> {
    let row: Option<(String, String, String, String, String)> = sqlx::query_as(
        "SELECT id, user_id, premises, status, created_at FROM premise_sets WHERE id = ?",
    )
    .bind(set_id)
    .fetch_optional(pool)
    .await
    .map_err(query_err)?;

    row.map(|(id, user_id, premises, status, created_at)| {
        let premises: Vec<Premise> =
            serde_json::from_str(&premises).map_err(|e| StorageError::ConstraintViolation {
                message: format!("malformed premises blob: {e}"),
            })?;
        Ok(PremiseSet {
            id,
            user_id,
            premises,
            status,
            created_at: parse_ts(&created_at)?,
        })
    })
    .transpose()
}

/// Mark a premise set discarded (superseded by a selection).
pub async fn mark_discarded(pool: &DbPool, set_id: &str) -> Result<(), StorageError> {
    sqlx::query("UPDATE premise_sets SET status = 'discarded' WHERE id = ?")
        .bind(set_id)
        .execute(pool)
        .await
        .map_err(query_err)?;
    Ok(())
}

/// Premise titles from the user's recent sets, used to keep new titles unique
/// within the history window.
pub async fn recent_premise_titles(
    pool: &DbPool,
    user_id: &str,
    window: u32,
) -> Result<Vec<String>, StorageError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT premises FROM premise_sets WHERE user_id = ? ORDER BY created_at DESC LIMIT ?",
    )
    .bind(user_id)
    .bind(window)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;

    let mut titles = Vec::new();
    for (blob,) in rows {
        let premises: Vec<Premise> =
            serde_json::from_str(&blob).map_err(|e| StorageError::ConstraintViolation {
                message: format!("malformed premises blob: {e}"),
            })?;
        titles.extend(premises.into_iter().map(|p| p.title));
    }
    Ok(titles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;
    use crate::story::PremiseTier;
    use chrono::Utc;

    fn set(id: &str, user: &str) -> PremiseSet {
        let premise = |title: &str, tier| Premise {
            title: title.to_string(),
            description: "desc".to_string(),
            hook: "hook".to_string(),
            genre: "fantasy".to_string(),
            themes: vec![],
            tier,
        };
        PremiseSet {
            id: id.to_string(),
            user_id: user.to_string(),
            premises: vec![
                premise("The Tide Keeper", PremiseTier::Comfort),
                premise("Salt and Iron", PremiseTier::Stretch),
                premise("The Paper Moon Heist", PremiseTier::Wildcard),
            ],
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_get_and_discard() {
        let pool = init_test_db().await.expect("init db");
        insert_premise_set(&pool, &set("ps1", "u1")).await.expect("insert");

        let loaded = get_premise_set(&pool, "ps1").await.expect("get").expect("some");
        assert_eq!(loaded.premises.len(), 3);
        assert_eq!(loaded.status, "active");
        assert!(loaded.validate().is_ok());

        mark_discarded(&pool, "ps1").await.expect("discard");
        let loaded = get_premise_set(&pool, "ps1").await.expect("get").expect("some");
        assert_eq!(loaded.status, "discarded");
    }

    #[tokio::test]
    async fn recent_titles_cover_the_window() {
        let pool = init_test_db().await.expect("init db");
        insert_premise_set(&pool, &set("ps1", "u1")).await.expect("insert");
        insert_premise_set(&pool, &set("ps2", "u2")).await.expect("insert");

        let titles = recent_premise_titles(&pool, "u1", 5).await.expect("titles");
        assert_eq!(titles.len(), 3);
        assert!(titles.contains(&"Salt and Iron".to_string()));
    }
}
