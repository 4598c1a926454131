//! Popup Express: real-time popup campaign decisioning service.
//!
//! Main entry point that wires the cache, the campaign store and the API.

use clap::Parser;
use popup_api::{ApiServer, AppState};
use popup_cache::{LocalCampaignCache, RedisCampaignCache};
use popup_core::config::{AppConfig, CacheBackend};
use popup_core::{CampaignCache, CampaignStore};
use popup_engine::PopupService;
use popup_management::InMemoryCampaignStore;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RESYNC_RETRY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "popup-express")]
#[command(about = "Real-time popup campaign decisioning service")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "POPUP_EXPRESS__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "POPUP_EXPRESS__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Prometheus exporter port (overrides config)
    #[arg(long, env = "POPUP_EXPRESS__METRICS__PORT")]
    metrics_port: Option<u16>,

    /// Use the in-process cache instead of Redis
    #[arg(long, default_value_t = false)]
    memory_cache: bool,

    /// Skip the cache rebuild on startup
    #[arg(long, default_value_t = false)]
    skip_resync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "popup_express=info,popup_engine=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Popup Express starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics.port = port;
    }
    if cli.memory_cache {
        config.cache.backend = CacheBackend::Memory;
    }
    if cli.skip_resync {
        config.sync.resync_on_startup = false;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        cache = ?config.cache.backend,
        request_timeout_ms = config.api.request_timeout_ms,
        "Configuration loaded"
    );

    // Initialize the cache
    let cache: Arc<dyn CampaignCache> = match config.cache.backend {
        CacheBackend::Redis => Arc::new(RedisCampaignCache::new(&config.redis).await?),
        CacheBackend::Memory => {
            let local = Arc::new(LocalCampaignCache::new(config.redis.impression_ttl_secs));
            spawn_local_maintenance(local.clone());
            local
        }
    };

    let store: Arc<dyn CampaignStore> = Arc::new(InMemoryCampaignStore::new());
    let service = Arc::new(PopupService::new(cache, store, &config));
    let state = AppState::new(service.clone(), config.node_id.clone());

    let api_server = ApiServer::new(config.clone(), state.clone());

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics() {
        error!(error = %e, "Failed to start metrics exporter");
    }

    // Rebuild the cache before reporting ready
    if config.sync.resync_on_startup {
        tokio::spawn(async move {
            loop {
                match service.sync_campaigns().await {
                    Ok(synced) => {
                        info!(synced, "Startup resync complete");
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "Startup resync failed, retrying");
                        tokio::time::sleep(RESYNC_RETRY).await;
                    }
                }
            }
            state.ready.store(true, Ordering::Release);
            info!("Popup Express is ready to serve traffic");
        });
    } else {
        state.ready.store(true, Ordering::Release);
        info!("Popup Express is ready to serve traffic");
    }

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}

/// Periodically drop idle impression counters from the in-process cache.
fn spawn_local_maintenance(cache: Arc<LocalCampaignCache>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = cache.evict_expired();
            debug!(evicted, active = cache.len(), "Local cache maintenance");
        }
    });
}
