//! Database query functions for the `users` table.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::models::UserRow;

/// Fields for a new user row.
#[derive(Debug)]
pub struct NewUser<'a> {
    pub id: Uuid,
    pub login: &'a str,
    pub password_hash: &'a str,
}

/// Insert a new user row. The `login` column is unique; inserting a
/// duplicate login is an error.
pub async fn insert_user(pool: &SqlitePool, new: &NewUser<'_>) -> Result<()> {
    sqlx::query(
        "INSERT INTO users (id, login, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(new.id)
    .bind(new.login)
    .bind(new.password_hash)
    .bind(Utc::now())
    .execute(pool)
    .await
    .context("failed to insert user")?;

    Ok(())
}

/// Fetch a user by login.
pub async fn get_user_by_login(pool: &SqlitePool, login: &str) -> Result<Option<UserRow>> {
    let user = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE login = ?1")
        .bind(login)
        .fetch_optional(pool)
        .await
        .context("failed to fetch user")?;

    Ok(user)
}
