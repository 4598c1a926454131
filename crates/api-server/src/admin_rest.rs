//! Administrative REST handlers: campaign CRUD against the durable store
//! (each write followed by a cache sync) and the manual resync trigger.

use crate::error::{ApiError, ErrorResponse};
use crate::rest::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use popup_core::{Campaign, CampaignId, PopupError};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct IdQuery {
    /// Campaign id.
    pub id: CampaignId,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page size, 1..=1000 (default 100).
    pub limit: Option<usize>,
    /// Only return campaigns with a lower id (pagination cursor).
    pub before_id: Option<CampaignId>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SyncResponse {
    pub synced: usize,
}

/// POST /admin/campaigns: Create a campaign and sync it to the cache.
#[utoipa::path(
    post,
    path = "/admin/campaigns",
    request_body = Campaign,
    responses(
        (status = 201, description = "Campaign created", body = Campaign),
        (status = 400, description = "Invalid campaign", body = ErrorResponse),
        (status = 500, description = "Store or cache write failed", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn create_campaign(
    State(state): State<AppState>,
    body: Result<Json<Campaign>, JsonRejection>,
) -> Result<(StatusCode, Json<Campaign>), ApiError> {
    let Json(campaign) = body.map_err(|e| ApiError::invalid(e.body_text()))?;
    let created = state.service.create_campaign(campaign).await?;
    metrics::counter!("admin.campaigns.created").increment(1);
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /admin/campaigns: Replace a campaign and sync it to the cache.
#[utoipa::path(
    put,
    path = "/admin/campaigns",
    request_body = Campaign,
    responses(
        (status = 200, description = "Campaign updated", body = Campaign),
        (status = 400, description = "Invalid campaign or missing id", body = ErrorResponse),
        (status = 404, description = "Campaign not found", body = ErrorResponse),
        (status = 500, description = "Store or cache write failed", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn update_campaign(
    State(state): State<AppState>,
    body: Result<Json<Campaign>, JsonRejection>,
) -> Result<Json<Campaign>, ApiError> {
    let Json(campaign) = body.map_err(|e| ApiError::invalid(e.body_text()))?;
    let updated = state.service.update_campaign(campaign).await?;
    Ok(Json(updated))
}

/// DELETE /admin/campaigns: Delete a campaign from the store and the cache.
#[utoipa::path(
    delete,
    path = "/admin/campaigns",
    params(IdQuery),
    responses(
        (status = 204, description = "Campaign deleted"),
        (status = 400, description = "Invalid id", body = ErrorResponse),
        (status = 500, description = "Store or cache write failed", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn delete_campaign(
    State(state): State<AppState>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid(e.body_text()))?;
    state.service.delete_campaign(query.id).await?;
    metrics::counter!("admin.campaigns.deleted").increment(1);
    Ok(StatusCode::NO_CONTENT)
}

/// GET /admin/campaigns: One page of campaigns from the durable store.
#[utoipa::path(
    get,
    path = "/admin/campaigns",
    params(ListQuery),
    responses(
        (status = 200, description = "Campaigns, newest first", body = Vec<Campaign>),
        (status = 400, description = "Invalid paging parameters", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn list_campaigns(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Vec<Campaign>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid(e.body_text()))?;
    let campaigns = state
        .service
        .list_campaigns(query.before_id, query.limit)
        .await?;
    Ok(Json(campaigns))
}

/// GET /admin/campaigns/detail: A single campaign from the durable store.
#[utoipa::path(
    get,
    path = "/admin/campaigns/detail",
    params(IdQuery),
    responses(
        (status = 200, description = "Campaign", body = Campaign),
        (status = 404, description = "Campaign not found", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn get_campaign(
    State(state): State<AppState>,
    query: Result<Query<IdQuery>, QueryRejection>,
) -> Result<Json<Campaign>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::invalid(e.body_text()))?;
    state
        .service
        .get_campaign(query.id)
        .await?
        .map(Json)
        .ok_or(ApiError(PopupError::NotFound(query.id)))
}

/// POST /admin/sync: Rebuild the cache from the durable store.
#[utoipa::path(
    post,
    path = "/admin/sync",
    responses(
        (status = 200, description = "Cache rebuilt", body = SyncResponse),
        (status = 500, description = "Some campaigns could not be synced", body = ErrorResponse)
    ),
    tag = "Admin"
)]
pub async fn sync_campaigns(State(state): State<AppState>) -> Result<Json<SyncResponse>, ApiError> {
    let synced = state.service.sync_campaigns().await?;
    info!(synced, "Manual resync finished");
    Ok(Json(SyncResponse { synced }))
}
