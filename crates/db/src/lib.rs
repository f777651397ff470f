//! Persistence for jobs and engine conversation logs.
//!
//! The orchestrator only sees the [`store::JobStore`] and
//! [`store::EngineLogStore`] capability traits. [`repositories`] holds the
//! PostgreSQL backends; [`memory`] holds in-process doubles for tests.

use sqlx::postgres::PgPoolOptions;

pub mod memory;
pub mod models;
pub mod repositories;
pub mod retry;
pub mod store;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Verify the pool can reach the database.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending schema migrations from `crates/db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
