use std::str::FromStr;
use std::time::Duration;

use tilegraph_cache::TileCacheConfig;
use tilegraph_core::headers::CacheControlPolicy;
use tilegraph_invalidation::{QueueConfig, ReconnectConfig};

/// Where the tile cache learns that a table changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessSource {
    /// Invalidations posted to this process.
    Ledger,
    /// `updated_at` from the table metadata in the database.
    Sql,
}

impl FromStr for FreshnessSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ledger" => Ok(Self::Ledger),
            "sql" => Ok(Self::Sql),
            other => Err(format!("unknown freshness source \"{other}\"")),
        }
    }
}

/// Management port of the downstream HTTP cache.
#[derive(Debug, Clone)]
pub struct VarnishConfig {
    pub host: String,
    pub port: u16,
    pub queue: QueueConfig,
    pub reconnect: ReconnectConfig,
    /// Connections kept open in pool mode; `0` sends through the queue.
    pub pool_size: usize,
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background services to stop after the server does.
    pub shutdown_timeout_secs: u64,
    /// Database holding the mapped tables.
    pub dbname: String,
    /// Role queries run as.
    pub db_user: String,
    pub renderer_url: String,
    pub tile_cache: TileCacheConfig,
    pub freshness: FreshnessSource,
    pub cache_control: CacheControlPolicy,
    /// Analyses built at once per request; `0` builds them all at once.
    pub analysis_parallelism: usize,
    pub map_store_max_items: usize,
    /// `None` when invalidation is disabled.
    pub varnish: Option<VarnishConfig>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                 |
    /// |-----------------------------------|-------------------------|
    /// | `HOST`                            | `0.0.0.0`               |
    /// | `PORT`                            | `3000`                  |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS`           | `30`                    |
    /// | `DB_NAME`                         | `cartodb_user_1_db`     |
    /// | `DB_USER`                         | `cartodb_user_1`        |
    /// | `RENDERER_URL`                    | `http://localhost:8181` |
    /// | `TILE_CACHE_MAX_ITEMS`            | `2048`                  |
    /// | `TILE_CACHE_TTL_SECS`             | `60`                    |
    /// | `TILE_CACHE_FRESHNESS`            | `ledger`                |
    /// | `CACHE_CONTROL_TTL_SECS`          | `31536000`              |
    /// | `CACHE_CONTROL_FALLBACK_TTL_SECS` | `300`                   |
    /// | `ANALYSIS_PARALLELISM`            | `0`                     |
    /// | `MAP_STORE_MAX_ITEMS`             | `4096`                  |
    /// | `VARNISH_ENABLED`                 | `false`                 |
    /// | `VARNISH_HOST`                    | `127.0.0.1`             |
    /// | `VARNISH_PORT`                    | `6082`                  |
    /// | `VARNISH_QUEUE_MAX`               | `2000`                  |
    /// | `VARNISH_RECONNECT_INTERVAL_MS`   | `1000`                  |
    /// | `VARNISH_RECONNECT_MAX_ATTEMPTS`  | `10`                    |
    /// | `VARNISH_POOL_SIZE`               | `0`                     |
    ///
    /// Panics on malformed values; misconfiguration should stop startup.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let tile_cache = TileCacheConfig {
            max_items: env_or("TILE_CACHE_MAX_ITEMS", 2048),
            ttl: Duration::from_secs(env_or("TILE_CACHE_TTL_SECS", 60)),
        };

        let cache_control = CacheControlPolicy::new(
            env_or("CACHE_CONTROL_TTL_SECS", tilegraph_core::headers::ONE_YEAR_SECS),
            env_or("CACHE_CONTROL_FALLBACK_TTL_SECS", 300),
        )
        .unwrap_or_else(|e| panic!("{e}"));

        let varnish = env_or("VARNISH_ENABLED", false).then(|| VarnishConfig {
            host: std::env::var("VARNISH_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            port: env_or("VARNISH_PORT", 6082),
            queue: QueueConfig {
                max_len: env_or("VARNISH_QUEUE_MAX", 2000),
            },
            reconnect: ReconnectConfig {
                interval: Duration::from_millis(env_or("VARNISH_RECONNECT_INTERVAL_MS", 1000)),
                max_attempts: env_or("VARNISH_RECONNECT_MAX_ATTEMPTS", 10),
            },
            pool_size: env_or("VARNISH_POOL_SIZE", 0),
        });

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: env_or("SHUTDOWN_TIMEOUT_SECS", 30),
            dbname: std::env::var("DB_NAME").unwrap_or_else(|_| "cartodb_user_1_db".into()),
            db_user: std::env::var("DB_USER").unwrap_or_else(|_| "cartodb_user_1".into()),
            renderer_url: std::env::var("RENDERER_URL")
                .unwrap_or_else(|_| "http://localhost:8181".into()),
            tile_cache,
            freshness: env_or("TILE_CACHE_FRESHNESS", FreshnessSource::Ledger),
            cache_control,
            analysis_parallelism: env_or("ANALYSIS_PARALLELISM", 0),
            map_store_max_items: env_or("MAP_STORE_MAX_ITEMS", 4096),
            varnish,
        }
    }
}

fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{name} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
