use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{continue_watching, internal_error, ApiError};
use crate::db::progress;
use crate::models::{MediaKind, WatchProgress};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_progress).put(update_progress).delete(clear_progress))
        .route("/:subject_id", delete(remove_progress))
}

/// Body of `PUT /progress`, sent when the user selects an episode or movie
#[derive(Debug, Deserialize)]
pub struct ProgressUpdate {
    pub subject_id: String,
    pub kind: MediaKind,
    pub title: Option<String>,
    #[serde(default)]
    pub season: i32,
    #[serde(default)]
    pub episode: i32,
    pub air_date: Option<NaiveDate>,
    /// Defaults to the time of the request
    pub watched_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: u64,
}

impl ProgressUpdate {
    fn into_progress(self) -> Result<WatchProgress, ApiError> {
        let subject_id = self.subject_id.trim().to_string();
        if subject_id.is_empty() {
            return Err((StatusCode::BAD_REQUEST, "Missing subject_id".to_string()));
        }
        if self.season < 0 || self.episode < 0 {
            return Err((
                StatusCode::BAD_REQUEST,
                "Season and episode must not be negative".to_string(),
            ));
        }

        // Movies have no episode position
        let (season, episode) = match self.kind {
            MediaKind::Movie => (0, 0),
            MediaKind::Show => (self.season, self.episode),
        };

        Ok(WatchProgress {
            subject_id,
            kind: self.kind,
            title: self.title,
            last_watched_season: season,
            last_watched_episode: episode,
            last_air_date_seen: self.air_date,
            last_watched_at: self.watched_at.unwrap_or_else(Utc::now),
        })
    }
}

async fn list_progress(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<WatchProgress>>, ApiError> {
    progress::list(&state.db).await.map(Json).map_err(internal_error)
}

async fn update_progress(
    State(state): State<Arc<AppState>>,
    Json(update): Json<ProgressUpdate>,
) -> Result<Json<WatchProgress>, ApiError> {
    let marker = update.into_progress()?;

    progress::upsert(&state.db, &marker)
        .await
        .map_err(internal_error)?;
    continue_watching::invalidate(&state);

    tracing::debug!(
        "Progress for {}: S{}E{}",
        marker.subject_id,
        marker.last_watched_season,
        marker.last_watched_episode
    );

    // Return the stored row, which keeps an existing title when none was sent
    let stored = progress::get(&state.db, &marker.subject_id)
        .await
        .map_err(internal_error)?
        .unwrap_or(marker);

    Ok(Json(stored))
}

async fn remove_progress(
    State(state): State<Arc<AppState>>,
    Path(subject_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let removed = progress::remove(&state.db, &subject_id)
        .await
        .map_err(internal_error)?;

    if !removed {
        return Err((
            StatusCode::NOT_FOUND,
            format!("No progress for {}", subject_id),
        ));
    }

    continue_watching::invalidate(&state);
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_progress(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ClearResponse>, ApiError> {
    let removed = progress::clear(&state.db).await.map_err(internal_error)?;
    continue_watching::invalidate(&state);

    tracing::info!("Cleared watch history ({} entries)", removed);
    Ok(Json(ClearResponse { removed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    fn put(body: &str) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_list_and_remove() {
        let state = crate::api::test_support::state().await;
        let app = routes().with_state(state.clone());

        let response = app
            .clone()
            .oneshot(put(
                r#"{"subject_id":"1399","kind":"show","title":"Game of Thrones","season":2,"episode":3,"air_date":"2012-04-15"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let stored: WatchProgress = serde_json::from_slice(&body).unwrap();
        assert_eq!(stored.position(), (2, 3));

        let listed = progress::list(&state.db).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title.as_deref(), Some("Game of Thrones"));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/1399")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/1399")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_rejects_blank_subject() {
        let app = routes().with_state(crate::api::test_support::state().await);

        let response = app
            .oneshot(put(r#"{"subject_id":"  ","kind":"movie"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_movie_progress_has_no_position() {
        let update = ProgressUpdate {
            subject_id: "550".to_string(),
            kind: MediaKind::Movie,
            title: None,
            season: 3,
            episode: 4,
            air_date: None,
            watched_at: None,
        };
        assert_eq!(update.into_progress().unwrap().position(), (0, 0));
    }
}
