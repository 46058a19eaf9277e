//! PostgreSQL access: pool construction and the sqlx-backed
//! [`SqlRunner`](tilegraph_core::capability::SqlRunner).

mod runner;

use sqlx::postgres::PgPoolOptions;

pub use runner::PgSqlRunner;

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to confirm the database is reachable.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
