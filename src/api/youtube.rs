use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{require_provider, upstream_error, ApiError};
use crate::AppState;

const DEFAULT_REGION: &str = "US";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/videos/:id", get(video_details))
        .route("/videos/:id/related", get(related_videos))
        .route("/search", get(search))
        .route("/trending", get(trending))
        .route("/channels/:id", get(channel))
        .route("/categories", get(categories))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegionQuery {
    pub region: Option<String>,
    pub category: Option<String>,
}

async fn video_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;
    client.video_details(&id).await.map(Json).map_err(upstream_error)
}

async fn related_videos(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;
    client.related_videos(&id).await.map(Json).map_err(upstream_error)
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;

    let q = query.q.trim();
    if q.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Missing search query".to_string()));
    }

    client
        .search(q, query.page_token.as_deref())
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn trending(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RegionQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;
    let region = query.region.as_deref().unwrap_or(DEFAULT_REGION);

    client
        .trending(region, query.category.as_deref())
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;
    client.channel(&id).await.map(Json).map_err(upstream_error)
}

async fn categories(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RegionQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = require_provider(&state.youtube, "YouTube")?;
    let region = query.region.as_deref().unwrap_or(DEFAULT_REGION);

    client.categories(region).await.map(Json).map_err(upstream_error)
}
