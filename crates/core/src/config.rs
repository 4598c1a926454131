use crate::error::{PopupError, PopupResult};
use serde::Deserialize;

/// Root application configuration. Loaded from environment variables
/// with the prefix `POPUP_EXPRESS__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Deadline applied to every request's cache and store calls.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_urls")]
    pub urls: Vec<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Idle expiry of a user's impression counters.
    #[serde(default = "default_impression_ttl_secs")]
    pub impression_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Page size used when walking the durable store during a resync.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_resync_on_startup")]
    pub resync_on_startup: bool,
    /// Drop cached campaigns the store no longer has during a resync. Only
    /// enable when the store is the shared system of record; against an
    /// empty or node-local store this clears the whole cache.
    #[serde(default)]
    pub prune_orphans: bool,
    /// Deadline for a full resync, which outlives a normal request.
    #[serde(default = "default_sync_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default functions
fn default_node_id() -> String {
    "popup-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_request_timeout_ms() -> u64 {
    250
}
fn default_redis_urls() -> Vec<String> {
    vec!["redis://localhost:6379".to_string()]
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_impression_ttl_secs() -> u64 {
    24 * 60 * 60
}
fn default_cache_backend() -> CacheBackend {
    CacheBackend::Redis
}
fn default_page_size() -> usize {
    100
}
fn default_resync_on_startup() -> bool {
    true
}
fn default_sync_timeout_ms() -> u64 {
    30_000
}
fn default_metrics_port() -> u16 {
    9091
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            urls: default_redis_urls(),
            connect_timeout_ms: default_connect_timeout_ms(),
            impression_ttl_secs: default_impression_ttl_secs(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            resync_on_startup: default_resync_on_startup(),
            prune_orphans: false,
            timeout_ms: default_sync_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            redis: RedisConfig::default(),
            cache: CacheConfig::default(),
            sync: SyncConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> PopupResult<Self> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("POPUP_EXPRESS")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("redis.urls"),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| PopupError::Config(e.to_string()))
    }
}
