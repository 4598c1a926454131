//! API server: HTTP routes plus the Prometheus exporter.

use crate::admin_rest;
use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use axum::routing::{get, post};
use axum::Router;
use popup_core::config::AppConfig;
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Client
        .route("/v1/campaigns/popup", get(rest::get_popup))
        .route("/v1/campaigns/impression", post(rest::register_impression))
        // Admin
        .route(
            "/admin/campaigns",
            get(admin_rest::list_campaigns)
                .post(admin_rest::create_campaign)
                .put(admin_rest::update_campaign)
                .delete(admin_rest::delete_campaign),
        )
        .route("/admin/campaigns/detail", get(admin_rest::get_campaign))
        .route("/admin/sync", post(admin_rest::sync_campaigns))
        // Operational endpoints
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        // Middleware
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Main API server.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP REST server. Runs until the process is stopped.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = build_router(self.state.clone());

        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
