use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

pub mod progress;

/// Open the SQLite pool with the pragmas the server relies on
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?
        .create_if_missing(true)
        // WAL lets the sweeper and request handlers read while a write is in flight
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .connect_with(connect_options)
        .await
        .context("Failed to open SQLite database")?;

    tracing::info!("SQLite configured: WAL mode, NORMAL sync");

    Ok(pool)
}

pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        -- Key-value store behind the persistent response cache
        CREATE TABLE IF NOT EXISTS cache_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- Last-watched marker per movie/show
        CREATE TABLE IF NOT EXISTS watch_progress (
            subject_id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            title TEXT,
            last_watched_season INTEGER NOT NULL DEFAULT 0,
            last_watched_episode INTEGER NOT NULL DEFAULT 0,
            last_air_date_seen TEXT,
            last_watched_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_watch_progress_last_watched
            ON watch_progress(last_watched_at DESC);
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to run database migrations")?;

    tracing::debug!("Database schema created/verified");

    Ok(())
}

/// Single-connection in-memory database with the schema applied
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    // Every connection to sqlite::memory: is a separate database, so keep one
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    migrate(&pool).await.expect("migrations");
    pool
}
