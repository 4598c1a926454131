//! Client-facing REST handlers (popup decision, impressions) and
//! operational endpoints.

use crate::error::{ApiError, ErrorResponse};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use popup_core::{Campaign, CampaignId, UserId};
use popup_engine::PopupService;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use utoipa::{IntoParams, ToSchema};

/// Shared application state for REST handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PopupService>,
    pub node_id: String,
    pub start_time: Instant,
    /// Flipped once startup work (initial resync) has finished.
    pub ready: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(service: Arc<PopupService>, node_id: String) -> Self {
        Self {
            service,
            node_id,
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PopupQuery {
    /// User to decide for.
    pub user_id: UserId,
}

#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct ImpressionRequest {
    pub user_id: UserId,
    pub campaign_id: CampaignId,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
}

/// GET /v1/campaigns/popup: Best popup for a user, or 204 when none applies.
#[utoipa::path(
    get,
    path = "/v1/campaigns/popup",
    params(PopupQuery),
    responses(
        (status = 200, description = "Campaign to show", body = Campaign),
        (status = 204, description = "No suitable campaign"),
        (status = 400, description = "Invalid user id", body = ErrorResponse),
        (status = 500, description = "Active index unavailable", body = ErrorResponse),
        (status = 504, description = "Request deadline exceeded", body = ErrorResponse)
    ),
    tag = "Client"
)]
pub async fn get_popup(
    State(state): State<AppState>,
    query: Result<Query<PopupQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid(e.body_text()))?;

    let start = Instant::now();
    let popup = state.service.get_popup(query.user_id).await?;
    let elapsed = start.elapsed();

    let mut response = match popup {
        Some(campaign) => Json(campaign).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    };
    if let Ok(value) = HeaderValue::from_str(&format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0)) {
        response.headers_mut().insert("x-response-time", value);
    }
    Ok(response)
}

/// POST /v1/campaigns/impression: Record that a user has seen a campaign.
#[utoipa::path(
    post,
    path = "/v1/campaigns/impression",
    request_body = ImpressionRequest,
    responses(
        (status = 200, description = "Impression recorded"),
        (status = 400, description = "Invalid request", body = ErrorResponse),
        (status = 500, description = "Cache unavailable", body = ErrorResponse)
    ),
    tag = "Client"
)]
pub async fn register_impression(
    State(state): State<AppState>,
    body: Result<Json<ImpressionRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::invalid(e.body_text()))?;
    state
        .service
        .register_impression(req.user_id, req.campaign_id)
        .await?;
    Ok(StatusCode::OK)
}

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "Operations"
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /ready: Readiness probe for Kubernetes.
/// Returns 200 only once the startup resync has run.
#[utoipa::path(
    get,
    path = "/ready",
    responses(
        (status = 200, description = "Ready for traffic"),
        (status = 503, description = "Still starting")
    ),
    tag = "Operations"
)]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if state.ready.load(Ordering::Acquire) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET /live: Liveness probe for Kubernetes.
#[utoipa::path(
    get,
    path = "/live",
    responses((status = 200, description = "Process is alive")),
    tag = "Operations"
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
