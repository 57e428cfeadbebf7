use anyhow::{Context, Result};
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod cache;
mod config;
mod db;
mod detector;
mod models;
mod services;

use cache::{MemoryStorage, PersistentCache, SqliteStorage, StorageBackend, TtlCache};
use config::AppConfig;
use detector::ProcessedItem;
use services::{tmdb::TmdbClient, youtube::YoutubeClient};

/// Tracks all background task handles for graceful shutdown
struct BackgroundTasks {
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.handles.push((name, handle));
    }

    async fn shutdown(self) {
        tracing::info!("Initiating graceful shutdown...");

        self.shutdown.cancel();

        for (name, handle) in self.handles {
            tracing::debug!("Waiting for {} to finish...", name);
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => tracing::debug!("{} finished cleanly", name),
                Ok(Err(e)) => tracing::warn!("{} panicked: {}", name, e),
                Err(_) => tracing::warn!("{} timed out during shutdown", name),
            }
        }

        tracing::info!("All background tasks stopped");
    }
}

pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub config: AppConfig,
    /// Provider responses, persisted across restarts
    pub cache: Arc<PersistentCache>,
    /// Short-lived computed results (continue-watching list)
    pub memo: TtlCache<Vec<ProcessedItem>>,
    /// Bumped whenever the watch history changes
    pub memo_generation: AtomicU64,
    pub tmdb: Option<Arc<TmdbClient>>,
    pub youtube: Option<Arc<YoutubeClient>>,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, config: AppConfig, storage: Arc<dyn StorageBackend>) -> Self {
        let cache = Arc::new(
            PersistentCache::new(storage)
                .with_ttl(config.cache.ttl())
                .with_max_size(config.cache.max_size_bytes()),
        );

        let tmdb = config
            .tmdb_api_key
            .clone()
            .map(|key| Arc::new(TmdbClient::new(key, cache.clone())));
        let youtube = config
            .youtube_api_key
            .clone()
            .map(|key| Arc::new(YoutubeClient::new(key, cache.clone())));

        Self {
            memo: TtlCache::new(config.cache.memory_ttl()),
            memo_generation: AtomicU64::new(0),
            db,
            config,
            cache,
            tmdb,
            youtube,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "media_hub=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load();

    config.paths.ensure_dirs().await?;

    config.log_config();

    let database_url = config.database_url();
    tracing::debug!("Database URL: {}", database_url);

    let pool = db::connect(&database_url).await?;
    db::migrate(&pool).await?;

    let storage: Arc<dyn StorageBackend> = if config.cache.persist {
        Arc::new(SqliteStorage::new(
            pool.clone(),
            config.cache.storage_quota_bytes(),
        ))
    } else {
        tracing::info!("Response cache kept in memory only");
        Arc::new(MemoryStorage::new(config.cache.storage_quota_bytes()))
    };
    let state = Arc::new(AppState::new(pool.clone(), config.clone(), storage));

    let mut bg_tasks = BackgroundTasks::new();
    let shutdown_token = bg_tasks.token();

    // Expired records are only removed lazily on read otherwise
    if config.cache.sweep_interval_minutes > 0 {
        let sweep_state = state.clone();
        let cancel = shutdown_token.clone();
        let interval = config.cache.sweep_interval();

        bg_tasks.spawn("cache-sweep", async move {
            sweep_caches(&sweep_state).await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Cache sweep received shutdown signal");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        sweep_caches(&sweep_state).await;
                    }
                }
            }
        });
    } else {
        tracing::info!("Cache sweep disabled (interval set to 0)");
    }

    async fn root_handler() -> &'static str {
        "Media Hub Server"
    }

    let app = Router::new()
        .route("/", get(root_handler).head(root_handler))
        .route("/health", get(|| async { "OK" }))
        .merge(api::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port)
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_address))?;
    tracing::info!("Starting server on {}", addr);

    let shutdown_signal = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
            _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    bg_tasks.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn sweep_caches(state: &AppState) {
    let removed = state.cache.clear_expired().await;
    let purged = if state.memo.is_empty() {
        0
    } else {
        state.memo.purge_expired()
    };
    if removed > 0 || purged > 0 {
        tracing::info!(
            "Cache sweep: removed {} expired records, {} memo entries",
            removed,
            purged
        );
    } else {
        tracing::debug!("Cache sweep: nothing expired");
    }
}
