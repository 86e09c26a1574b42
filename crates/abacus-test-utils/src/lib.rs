//! Shared test utilities for abacus integration tests.
//!
//! Each test gets its own fully-migrated in-memory SQLite database. A
//! single pool connection keeps every handle on the same database (each
//! `:memory:` connection is otherwise a distinct database).

use sqlx::SqlitePool;

use abacus_db::config::DbConfig;
use abacus_db::pool;

/// Create an isolated, migrated in-memory database pool.
pub async fn create_test_pool() -> SqlitePool {
    let config = DbConfig::new("sqlite::memory:");
    let db = pool::create_pool(&config)
        .await
        .expect("failed to open in-memory database");
    pool::run_migrations(&db, pool::default_migrations_path())
        .await
        .expect("failed to run migrations");
    db
}

/// Create a migrated pool backed by a file, for tests that reopen the
/// database to check durability.
pub async fn create_file_pool(path: &std::path::Path) -> SqlitePool {
    let config = DbConfig::new(format!("sqlite://{}", path.display()));
    let db = pool::create_pool(&config)
        .await
        .expect("failed to open database file");
    pool::run_migrations(&db, pool::default_migrations_path())
        .await
        .expect("failed to run migrations");
    db
}
