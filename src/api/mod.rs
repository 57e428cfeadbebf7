use axum::{http::StatusCode, Router};
use std::sync::Arc;

use crate::services::NotFound;
use crate::AppState;

mod cache;
mod continue_watching;
mod progress;
mod tmdb;
mod youtube;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/youtube", youtube::routes())
        .nest("/tmdb", tmdb::routes())
        .nest("/progress", progress::routes())
        .nest("/continue-watching", continue_watching::routes())
        .nest("/cache", cache::routes())
}

pub(crate) type ApiError = (StatusCode, String);

/// 503 when the provider has no API key configured
fn require_provider<T>(client: &Option<Arc<T>>, name: &str) -> Result<Arc<T>, ApiError> {
    client.clone().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("{} is not configured", name),
        )
    })
}

/// 404 when the provider has no such resource, 502 for anything else
fn upstream_error(e: anyhow::Error) -> ApiError {
    if e.chain().any(|cause| cause.downcast_ref::<NotFound>().is_some()) {
        tracing::debug!("Upstream resource missing: {:#}", e);
        return (StatusCode::NOT_FOUND, format!("{:#}", e));
    }

    tracing::warn!("Upstream request failed: {:#}", e);
    (StatusCode::BAD_GATEWAY, format!("{:#}", e))
}

fn internal_error(e: anyhow::Error) -> ApiError {
    tracing::error!("Request failed: {:#}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::cache::MemoryStorage;
    use crate::config::{AppConfig, AppPaths, CacheConfig};
    use crate::AppState;

    /// App state over an in-memory database with no providers configured
    pub async fn state() -> Arc<AppState> {
        let config = AppConfig {
            paths: AppPaths::current_dir(),
            port: 0,
            bind_address: "127.0.0.1".to_string(),
            tmdb_api_key: None,
            youtube_api_key: None,
            cache: CacheConfig::default(),
        };
        let storage = Arc::new(MemoryStorage::new(config.cache.storage_quota_bytes()));
        Arc::new(AppState::new(crate::db::test_pool().await, config, storage))
    }
}
