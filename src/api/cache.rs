use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::continue_watching;
use crate::cache::{CacheStats, ContentKind};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(stats))
        .route("/clear", post(clear))
        .route("/clear-expired", post(clear_expired))
        .route("/subjects/:id", delete(clear_subject))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub persistent: CacheStats,
    pub ttl_hours: i64,
    pub max_size_bytes: u64,
    pub memo_entries: usize,
    pub continue_watching_memoized: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClearQuery {
    /// Only clear records of this kind
    pub kind: Option<ContentKind>,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub removed: usize,
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        persistent: state.cache.stats().await,
        ttl_hours: state.cache.ttl().num_hours(),
        max_size_bytes: state.config.cache.max_size_bytes(),
        memo_entries: state.memo.len(),
        continue_watching_memoized: continue_watching::is_memoized(&state),
    })
}

async fn clear(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClearQuery>,
) -> Json<ClearResponse> {
    let removed = match query.kind {
        Some(kind) => state.cache.clear_kind(kind).await,
        None => {
            continue_watching::invalidate(&state);
            state.memo.clear();
            state.cache.clear_all().await
        }
    };

    tracing::info!("Cleared {} cached records", removed);
    Json(ClearResponse { removed })
}

async fn clear_expired(State(state): State<Arc<AppState>>) -> Json<ClearResponse> {
    let removed = state.cache.clear_expired().await;
    state.memo.purge_expired();
    Json(ClearResponse { removed })
}

async fn clear_subject(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Json<ClearResponse> {
    let removed = state.cache.clear_for_subject(&id).await;
    tracing::debug!("Cleared {} cached records for {}", removed, id);
    Json(ClearResponse { removed })
}
