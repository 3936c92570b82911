//! LLM usage tracking — append-only per (user, operation) token accounting.

use super::{query_err, DbPool};
use crate::error::StorageError;

/// Summary of costs across multiple time windows.
#[derive(Debug, serde::Serialize)]
pub struct CostSummary {
    pub cost_today: f64,
    pub cost_7d: f64,
    pub cost_30d: f64,
    pub cost_all_time: f64,
    pub calls_today: i64,
    pub calls_7d: i64,
    pub calls_30d: i64,
    pub calls_all_time: i64,
}

/// Cost breakdown by pipeline operation (premises, bible, chapter, ...).
#[derive(Debug, serde::Serialize)]
pub struct OperationCostBreakdown {
    pub operation: String,
    pub cost: f64,
    pub calls: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Insert a new LLM usage record.
#[allow(clippy::too_many_arguments)]
pub async fn insert_llm_usage(
    pool: &DbPool,
    user_id: &str,
    operation: &str,
    provider: &str,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
    cost_usd: f64,
    context: Option<&serde_json::Value>,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO llm_usage (user_id, operation, provider, model, input_tokens, output_tokens, cost_usd, context) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(operation)
    .bind(provider)
    .bind(model)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(cost_usd)
    .bind(context.map(std::string::ToString::to_string))
    .execute(pool)
    .await
    .map_err(query_err)?;
    Ok(())
}

/// Get cost summary across time windows, optionally scoped to one user.
pub async fn get_cost_summary(
    pool: &DbPool,
    user_id: Option<&str>,
) -> Result<CostSummary, StorageError> {
    let filter = if user_id.is_some() { "WHERE user_id = ?1" } else { "" };
    let sql = format!(
        "SELECT
            COALESCE(SUM(CASE WHEN created_at >= date('now') THEN cost_usd ELSE 0.0 END), 0.0),
            COALESCE(SUM(CASE WHEN created_at >= date('now') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN created_at >= date('now', '-7 days') THEN cost_usd ELSE 0.0 END), 0.0),
            COALESCE(SUM(CASE WHEN created_at >= date('now', '-7 days') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN created_at >= date('now', '-30 days') THEN cost_usd ELSE 0.0 END), 0.0),
            COALESCE(SUM(CASE WHEN created_at >= date('now', '-30 days') THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(cost_usd), 0.0),
            COUNT(*)
        FROM llm_usage {filter}"
    );

    let mut query = sqlx::query_as(&sql);
    if let Some(user) = user_id {
        query = query.bind(user);
    }
    let row: (f64, i64, f64, i64, f64, i64, f64, i64) =
        query.fetch_one(pool).await.map_err(query_err)?;

    Ok(CostSummary {
        cost_today: row.0,
        calls_today: row.1,
        cost_7d: row.2,
        calls_7d: row.3,
        cost_30d: row.4,
        calls_30d: row.5,
        cost_all_time: row.6,
        calls_all_time: row.7,
    })
}

/// Get cost breakdown by pipeline operation over the last `days` days.
pub async fn get_operation_breakdown(
    pool: &DbPool,
    days: u32,
) -> Result<Vec<OperationCostBreakdown>, StorageError> {
    let rows: Vec<(String, f64, i64, i64, i64)> = sqlx::query_as(
        "SELECT
            operation,
            COALESCE(SUM(cost_usd), 0.0),
            COUNT(*),
            COALESCE(SUM(input_tokens), 0),
            COALESCE(SUM(output_tokens), 0)
        FROM llm_usage
        WHERE created_at >= date('now', '-' || ?1 || ' days')
        GROUP BY operation
        ORDER BY SUM(cost_usd) DESC",
    )
    .bind(days)
    .fetch_all(pool)
    .await
    .map_err(query_err)?;

    Ok(rows
        .into_iter()
        .map(
            |(operation, cost, calls, input_tokens, output_tokens)| OperationCostBreakdown {
                operation,
                cost,
                calls,
                input_tokens,
                output_tokens,
            },
        )
        .collect())
}
