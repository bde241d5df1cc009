use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};
use tracing::info;

use crate::db::INIT_SCHEMA;

pub async fn establish_connection(database_url: &str) -> Result<Pool<Sqlite>, sqlx::Error> {
    // Create database if it doesn't exist
    if !Sqlite::database_exists(database_url).await.unwrap_or(false) {
        Sqlite::create_database(database_url).await?;
        info!("Created database at {}", database_url);
    }

    // Create connection pool
    let pool = SqlitePool::connect(database_url).await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

    // Initialize schema
    sqlx::query(INIT_SCHEMA).execute(&pool).await?;

    Ok(pool)
}
