use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{require_provider, upstream_error, ApiError};
use crate::services::tmdb::{
    MovieDetails, MovieSearchResult, SeasonDetails, TmdbClient, TvDetails, TvSearchResult,
};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search/tv", get(search_tv))
        .route("/search/movie", get(search_movie))
        .route("/trending/:media_type", get(trending))
        .route("/tv/:id", get(tv_details))
        .route("/tv/:id/season/:season", get(season_details))
        .route("/movie/:id", get(movie_details))
        .route("/discover/:media_type", get(discover))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub year: Option<i32>,
    pub page: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    pub window: Option<String>,
}

fn tmdb(state: &AppState) -> Result<Arc<TmdbClient>, ApiError> {
    require_provider(&state.tmdb, "TMDB")
}

fn search_term(query: &SearchQuery) -> Result<&str, ApiError> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Missing search query".to_string()));
    }
    Ok(q)
}

async fn search_tv(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<TvSearchResult>>, ApiError> {
    let client = tmdb(&state)?;
    let q = search_term(&query)?;

    client
        .search_tv(q, query.year, query.page)
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn search_movie(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<MovieSearchResult>>, ApiError> {
    let client = tmdb(&state)?;
    let q = search_term(&query)?;

    client
        .search_movie(q, query.year, query.page)
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn trending(
    State(state): State<Arc<AppState>>,
    Path(media_type): Path<String>,
    Query(query): Query<TrendingQuery>,
) -> Result<Json<Value>, ApiError> {
    let client = tmdb(&state)?;

    if !matches!(media_type.as_str(), "all" | "movie" | "tv") {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown media type: {}", media_type),
        ));
    }

    let window = query.window.as_deref().unwrap_or("week");
    if !matches!(window, "day" | "week") {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown time window: {}", window),
        ));
    }

    client
        .trending(&media_type, window)
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn tv_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TvDetails>, ApiError> {
    let client = tmdb(&state)?;
    client.tv_details(id).await.map(Json).map_err(upstream_error)
}

async fn season_details(
    State(state): State<Arc<AppState>>,
    Path((id, season)): Path<(i64, i32)>,
) -> Result<Json<SeasonDetails>, ApiError> {
    let client = tmdb(&state)?;
    client
        .season_details(id, season)
        .await
        .map(Json)
        .map_err(upstream_error)
}

async fn movie_details(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<MovieDetails>, ApiError> {
    let client = tmdb(&state)?;
    client.movie_details(id).await.map(Json).map_err(upstream_error)
}

/// Query string is forwarded as discover filters (sort_by, with_genres, ...)
async fn discover(
    State(state): State<Arc<AppState>>,
    Path(media_type): Path<String>,
    Query(filters): Query<BTreeMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let client = tmdb(&state)?;

    if !matches!(media_type.as_str(), "movie" | "tv") {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("Unknown media type: {}", media_type),
        ));
    }

    client
        .discover(&media_type, &filters)
        .await
        .map(Json)
        .map_err(upstream_error)
}
