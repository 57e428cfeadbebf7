use axum::{extract::State, routing::get, Json, Router};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{internal_error, ApiError};
use crate::cache::{Clock, SystemClock};
use crate::db::progress;
use crate::detector::{self, ProcessedItem};
use crate::AppState;

const MEMO_KEY: &str = "continue_watching";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(continue_watching))
}

/// Drop the memoized list after the watch history changes
///
/// The generation is bumped before the delete so a request that read the
/// history earlier can tell its result is stale.
pub(super) fn invalidate(state: &AppState) {
    state.memo_generation.fetch_add(1, Ordering::SeqCst);
    state.memo.delete(MEMO_KEY);
}

pub(super) fn is_memoized(state: &AppState) -> bool {
    state.memo.has(MEMO_KEY)
}

/// Store `items` only if no invalidation happened since `generation` was read
fn memoize(state: &AppState, generation: u64, items: Vec<ProcessedItem>) -> bool {
    if state.memo_generation.load(Ordering::SeqCst) != generation {
        return false;
    }
    state.memo.set(MEMO_KEY, items);

    // An invalidation between the check and the set must still win
    if state.memo_generation.load(Ordering::SeqCst) != generation {
        state.memo.delete(MEMO_KEY);
        return false;
    }
    true
}

/// Watch history annotated with new-episode results
///
/// Without a TMDB key the list is returned in the same order with no
/// episode checks.
async fn continue_watching(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ProcessedItem>>, ApiError> {
    if let Some(items) = state.memo.get(MEMO_KEY) {
        tracing::debug!("Continue watching served from memo");
        return Ok(Json(items));
    }

    let generation = state.memo_generation.load(Ordering::SeqCst);
    let history = progress::list(&state.db).await.map_err(internal_error)?;

    let items = match &state.tmdb {
        Some(tmdb) => {
            detector::process_batch(history, &**tmdb, SystemClock.today()).await
        }
        None => detector::without_detection(history),
    };

    let with_new = items.iter().filter(|i| i.result.has_new_episodes).count();
    tracing::debug!(
        "Continue watching: {} items, {} with new episodes",
        items.len(),
        with_new
    );

    if !memoize(&state, generation, items.clone()) {
        tracing::debug!("Watch history changed during the check, result not memoized");
    }
    Ok(Json(items))
}
