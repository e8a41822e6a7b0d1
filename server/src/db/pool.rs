//! PostgreSQL pool backing [`PgRowStore`](super::PgRowStore).

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub type Pool = PgPool;

/// Connect to the row database. Requests waiting longer than five seconds
/// for a connection fail with [`sqlx::Error::PoolTimedOut`].
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;
    tracing::debug!(max_connections, "Row database pool ready");
    Ok(pool)
}

/// Create the `sync_rows` table and its index.
pub async fn run_migrations(pool: &Pool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
