//! OpenAPI document and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Popup Express API",
        version = "0.1.0",
        description = "Popup campaign decisioning backed by a Redis cache and a durable campaign store.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Client", description = "Popup decision and impression tracking"),
        (name = "Admin", description = "Campaign management and cache resynchronization"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        // Client
        crate::rest::get_popup,
        crate::rest::register_impression,
        // Admin
        crate::admin_rest::create_campaign,
        crate::admin_rest::update_campaign,
        crate::admin_rest::delete_campaign,
        crate::admin_rest::list_campaigns,
        crate::admin_rest::get_campaign,
        crate::admin_rest::sync_campaigns,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        popup_core::Campaign,
        popup_core::Target,
        crate::rest::ImpressionRequest,
        crate::rest::HealthResponse,
        crate::admin_rest::SyncResponse,
        crate::error::ErrorResponse,
    ))
)]
pub struct ApiDoc;
