// Watch progress persistence
// One row per movie/show; rows only disappear through explicit removal

use anyhow::Result;
use sqlx::SqlitePool;

use crate::models::WatchProgress;

/// Insert or replace the marker for a subject
pub async fn upsert(pool: &SqlitePool, progress: &WatchProgress) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO watch_progress (
            subject_id, kind, title, last_watched_season, last_watched_episode,
            last_air_date_seen, last_watched_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(subject_id) DO UPDATE SET
            kind = excluded.kind,
            title = COALESCE(excluded.title, watch_progress.title),
            last_watched_season = excluded.last_watched_season,
            last_watched_episode = excluded.last_watched_episode,
            last_air_date_seen = excluded.last_air_date_seen,
            last_watched_at = excluded.last_watched_at
        "#,
    )
    .bind(&progress.subject_id)
    .bind(progress.kind)
    .bind(&progress.title)
    .bind(progress.last_watched_season)
    .bind(progress.last_watched_episode)
    .bind(progress.last_air_date_seen)
    .bind(progress.last_watched_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn get(pool: &SqlitePool, subject_id: &str) -> Result<Option<WatchProgress>> {
    let row = sqlx::query_as::<_, WatchProgress>("SELECT * FROM watch_progress WHERE subject_id = ?")
        .bind(subject_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// All markers, most recently watched first
pub async fn list(pool: &SqlitePool) -> Result<Vec<WatchProgress>> {
    let rows = sqlx::query_as::<_, WatchProgress>(
        "SELECT * FROM watch_progress ORDER BY last_watched_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Returns true when a row was removed
pub async fn remove(pool: &SqlitePool, subject_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM watch_progress WHERE subject_id = ?")
        .bind(subject_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Clear the whole watch history
pub async fn clear(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM watch_progress")
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
