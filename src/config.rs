// Configuration module for media-hub
// Handles XDG-compliant directory paths and TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;

const APP_NAME: &str = "media-hub";
const CONFIG_FILENAME: &str = "config.toml";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server configuration
    pub server: ServerConfig,

    /// Directory paths (overrides XDG defaults)
    pub paths: PathsConfig,

    /// Provider API keys
    pub providers: ProvidersConfig,

    /// Cache sizing and expiry
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 8787)
    pub port: u16,

    /// Bind address (default: 127.0.0.1)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            bind_address: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Override data directory (database location)
    pub data_dir: Option<PathBuf>,

    /// Override config directory
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// TMDB API key (optional, enables /tmdb routes and new-episode checks)
    pub tmdb_api_key: Option<String>,

    /// YouTube Data API key (optional, enables /youtube routes)
    pub youtube_api_key: Option<String>,
}

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a persisted response is refetched (default: 24)
    pub ttl_hours: i64,

    /// Ceiling for the total size of cached responses (default: 50)
    /// Oldest records are evicted first once it is reached
    pub max_size_mb: u64,

    /// Hard quota of the storage table (default: 64)
    /// Writes past it fail and trigger one evict-and-retry cycle
    pub storage_quota_mb: u64,

    /// Lifetime of in-memory entries (default: 15)
    pub memory_ttl_minutes: i64,

    /// Interval for sweeping expired records (default: 60, 0 to disable)
    pub sweep_interval_minutes: u64,

    /// Keep cached responses in the database (default: true)
    /// When false they live in process memory and are lost on restart
    pub persist: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            max_size_mb: 50,
            storage_quota_mb: 64,
            memory_ttl_minutes: 15,
            sweep_interval_minutes: 60,
            persist: true,
        }
    }
}

const MIB: u64 = 1024 * 1024;

impl CacheConfig {
    pub fn max_size_bytes(&self) -> u64 {
        self.max_size_mb.saturating_mul(MIB)
    }

    pub fn storage_quota_bytes(&self) -> u64 {
        self.storage_quota_mb.saturating_mul(MIB)
    }

    /// Persistent record lifetime, clamped to what chrono can represent
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::try_hours(self.ttl_hours).unwrap_or(chrono::Duration::MAX)
    }

    pub fn memory_ttl(&self) -> chrono::Duration {
        chrono::Duration::try_minutes(self.memory_ttl_minutes).unwrap_or(chrono::Duration::MAX)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_minutes.saturating_mul(60))
    }
}

/// Application paths following XDG Base Directory Specification on Unix
/// On other platforms, falls back to the current directory or platform-specific locations
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Directory for configuration files (config.toml)
    /// XDG: $XDG_CONFIG_HOME/media-hub or ~/.config/media-hub
    pub config_dir: PathBuf,

    /// Directory for persistent data (database)
    /// XDG: $XDG_DATA_HOME/media-hub or ~/.local/share/media-hub
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Create application paths using XDG directories (or fallbacks)
    ///
    /// Priority order:
    /// 1. Environment variables (MEDIA_HUB_CONFIG_DIR, MEDIA_HUB_DATA_DIR)
    /// 2. Config file overrides
    /// 3. XDG/platform directories
    /// 4. Current directory fallback
    pub fn new(config_overrides: &PathsConfig) -> Self {
        Self {
            config_dir: Self::resolve_dir(
                "MEDIA_HUB_CONFIG_DIR",
                &config_overrides.config_dir,
                dirs::config_dir(),
            ),
            data_dir: Self::resolve_dir(
                "MEDIA_HUB_DATA_DIR",
                &config_overrides.data_dir,
                dirs::data_dir(),
            ),
        }
    }

    /// Create application paths using current directory (portable mode)
    pub fn current_dir() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            config_dir: cwd.clone(),
            data_dir: cwd,
        }
    }

    fn resolve_dir(
        env_var: &str,
        config_override: &Option<PathBuf>,
        platform_dir: Option<PathBuf>,
    ) -> PathBuf {
        if let Ok(path) = std::env::var(env_var) {
            return PathBuf::from(path);
        }

        if let Some(ref path) = config_override {
            return path.clone();
        }

        if let Some(dir) = platform_dir {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Get the database file path
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("media-hub.db")
    }

    /// Get the database URL for SQLite
    pub fn database_url(&self) -> String {
        format!("sqlite:{}?mode=rwc", self.database_path().display())
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }

    /// Log the configured paths
    pub fn log_paths(&self) {
        tracing::info!("Configuration directory: {}", self.config_dir.display());
        tracing::info!("Data directory: {}", self.data_dir.display());
        tracing::debug!("Database path: {}", self.database_path().display());
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Application paths
    pub paths: AppPaths,

    /// Server port
    pub port: u16,

    /// Bind address
    pub bind_address: String,

    /// TMDB API key (optional)
    pub tmdb_api_key: Option<String>,

    /// YouTube Data API key (optional)
    pub youtube_api_key: Option<String>,

    /// Cache configuration
    pub cache: CacheConfig,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let portable_mode = std::env::var("MEDIA_HUB_PORTABLE")
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        if portable_mode {
            tracing::info!("Running in portable mode (using current directory)");
            let config_file = Self::load_config_file(&AppPaths::current_dir().config_dir);
            return Self::build(config_file, AppPaths::current_dir());
        }

        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        let paths = AppPaths::new(&config_file.paths);

        Self::build(config_file, paths)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        if let Ok(path) = std::env::var("MEDIA_HUB_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile, paths: AppPaths) -> Self {
        let port = Self::env_parse("MEDIA_HUB_PORT").unwrap_or(config_file.server.port);

        let bind_address = std::env::var("MEDIA_HUB_BIND_ADDRESS")
            .unwrap_or_else(|_| config_file.server.bind_address.clone());

        let tmdb_api_key = std::env::var("TMDB_API_KEY")
            .ok()
            .or(config_file.providers.tmdb_api_key);

        let youtube_api_key = std::env::var("YOUTUBE_API_KEY")
            .ok()
            .or(config_file.providers.youtube_api_key);

        let mut cache = config_file.cache;
        if let Some(hours) = Self::env_parse("MEDIA_HUB_CACHE_TTL_HOURS") {
            cache.ttl_hours = hours;
        }
        if let Some(mb) = Self::env_parse("MEDIA_HUB_CACHE_MAX_SIZE_MB") {
            cache.max_size_mb = mb;
        }

        Self {
            paths,
            port,
            bind_address,
            tmdb_api_key,
            youtube_api_key,
            cache,
        }
    }

    fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
        std::env::var(name).ok().and_then(|v| v.parse().ok())
    }

    /// Get the database URL, with override from DATABASE_URL env var
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.paths.database_url())
    }

    /// Log configuration status
    pub fn log_config(&self) {
        self.paths.log_paths();
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);

        match (&self.tmdb_api_key, &self.youtube_api_key) {
            (Some(_), Some(_)) => tracing::info!("Providers: TMDB + YouTube"),
            (Some(_), None) => tracing::info!("Providers: TMDB only"),
            (None, Some(_)) => tracing::info!("Providers: YouTube only"),
            (None, None) => {
                tracing::warn!("No provider API keys configured");
                tracing::info!("Hint: set TMDB_API_KEY / YOUTUBE_API_KEY or add them to config.toml");
            }
        }

        tracing::info!(
            "Cache: {}h TTL, {} MiB ceiling, {} MiB store quota, {}m memory TTL",
            self.cache.ttl_hours,
            self.cache.max_size_mb,
            self.cache.storage_quota_mb,
            self.cache.memory_ttl_minutes
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_dir_paths() {
        let paths = AppPaths::current_dir();
        assert_eq!(paths.config_dir, paths.data_dir);
        assert!(paths.database_path().ends_with("media-hub.db"));
    }

    #[test]
    fn test_database_url_format() {
        let paths = AppPaths::current_dir();
        let url = paths.database_url();
        assert!(url.starts_with("sqlite:"));
        assert!(url.ends_with("?mode=rwc"));
    }

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert!(config.providers.tmdb_api_key.is_none());
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.cache.max_size_bytes(), 50 * 1024 * 1024);
        assert_eq!(config.cache.memory_ttl_minutes, 15);
        assert!(config.cache.persist);
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
port = 9000
bind_address = "0.0.0.0"

[providers]
tmdb_api_key = "tmdb_key"
youtube_api_key = "yt_key"

[paths]
data_dir = "/custom/data"

[cache]
ttl_hours = 6
max_size_mb = 10
persist = false
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.providers.tmdb_api_key, Some("tmdb_key".to_string()));
        assert_eq!(config.providers.youtube_api_key, Some("yt_key".to_string()));
        assert_eq!(config.paths.data_dir, Some(PathBuf::from("/custom/data")));
        assert_eq!(config.cache.ttl_hours, 6);
        assert_eq!(config.cache.max_size_bytes(), 10 * 1024 * 1024);
        // Unspecified cache fields keep their defaults
        assert_eq!(config.cache.sweep_interval_minutes, 60);
        assert!(!config.cache.persist);
    }

    #[test]
    fn test_partial_config_toml() {
        let toml_str = r#"
[providers]
youtube_api_key = "yt_key"
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8787);
        assert_eq!(config.cache.storage_quota_mb, 64);
        assert!(config.providers.tmdb_api_key.is_none());
    }

    #[test]
    fn test_cache_conversions_do_not_overflow() {
        let cache = CacheConfig {
            ttl_hours: i64::MAX,
            max_size_mb: u64::MAX,
            storage_quota_mb: u64::MAX / 2,
            memory_ttl_minutes: i64::MAX,
            sweep_interval_minutes: u64::MAX,
            persist: true,
        };
        assert_eq!(cache.max_size_bytes(), u64::MAX);
        assert_eq!(cache.storage_quota_bytes(), u64::MAX);
        assert_eq!(cache.ttl(), chrono::Duration::MAX);
        assert_eq!(cache.memory_ttl(), chrono::Duration::MAX);
        assert_eq!(cache.sweep_interval().as_secs(), u64::MAX);

        let defaults = CacheConfig::default();
        assert_eq!(defaults.ttl(), chrono::Duration::hours(24));
        assert_eq!(defaults.memory_ttl(), chrono::Duration::minutes(15));
        assert_eq!(defaults.sweep_interval().as_secs(), 3600);
    }
}
