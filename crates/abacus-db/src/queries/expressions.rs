//! Database query functions for the `expressions` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::models::{ExpressionRow, ExpressionStatus};

/// Fields for a new expression row. Inserted with `status = accepted` and
/// no result.
#[derive(Debug)]
pub struct NewExpression<'a> {
    pub id: Uuid,
    pub owner: &'a str,
    pub tokens: Vec<String>,
}

/// Insert a new expression row.
pub async fn insert_expression(pool: &SqlitePool, new: &NewExpression<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO expressions (id, owner, status, tokens, result, created_at) \
         VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
    )
    .bind(new.id)
    .bind(new.owner)
    .bind(ExpressionStatus::Accepted)
    .bind(Json(&new.tokens))
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to insert expression")?;

    Ok(())
}

/// Fetch a single expression by ID.
pub async fn get_expression(pool: &SqlitePool, id: Uuid) -> Result<Option<ExpressionRow>> {
    let row = sqlx::query_as::<_, ExpressionRow>("SELECT * FROM expressions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch expression")?;

    Ok(row)
}

/// List all expressions belonging to an owner, oldest first.
pub async fn list_by_owner(pool: &SqlitePool, owner: &str) -> Result<Vec<ExpressionRow>> {
    let rows = sqlx::query_as::<_, ExpressionRow>(
        "SELECT * FROM expressions WHERE owner = ?1 ORDER BY created_at ASC",
    )
    .bind(owner)
    .fetch_all(pool)
    .await
    .context("failed to list expressions for owner")?;

    Ok(rows)
}

/// Load every expression that still needs evaluation, oldest first.
///
/// Terminal rows (`done`, `failed`) are excluded; the scheduler rebuilds
/// its queue from what remains on startup.
pub async fn load_pending(pool: &SqlitePool) -> Result<Vec<ExpressionRow>> {
    let rows = sqlx::query_as::<_, ExpressionRow>(
        "SELECT * FROM expressions WHERE status = ?1 ORDER BY created_at ASC",
    )
    .bind(ExpressionStatus::Accepted)
    .fetch_all(pool)
    .await
    .context("failed to load pending expressions")?;

    Ok(rows)
}

/// Persist the terminal `done` transition with the final value.
///
/// The write is committed before this returns.
pub async fn mark_done(pool: &SqlitePool, id: Uuid, result: f64) -> Result<()> {
    let outcome = sqlx::query("UPDATE expressions SET status = ?1, result = ?2 WHERE id = ?3")
        .bind(ExpressionStatus::Done)
        .bind(result)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark expression done")?;

    if outcome.rows_affected() == 0 {
        anyhow::bail!("expression {id} not found");
    }

    Ok(())
}

/// Persist the terminal `failed` transition.
pub async fn mark_failed(pool: &SqlitePool, id: Uuid) -> Result<()> {
    let outcome = sqlx::query("UPDATE expressions SET status = ?1, result = NULL WHERE id = ?2")
        .bind(ExpressionStatus::Failed)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark expression failed")?;

    if outcome.rows_affected() == 0 {
        anyhow::bail!("expression {id} not found");
    }

    Ok(())
}
