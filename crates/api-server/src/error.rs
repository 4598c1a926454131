//! Maps core errors onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use popup_core::PopupError;
use serde::Serialize;
use tracing::{error, warn};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error wrapper; every handler returns `Result<_, ApiError>`.
#[derive(Debug)]
pub struct ApiError(pub PopupError);

impl ApiError {
    /// Wrap an extractor rejection (bad query string, malformed body) as a
    /// validation failure.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self(PopupError::Validation(message.into()))
    }
}

impl From<PopupError> for ApiError {
    fn from(e: PopupError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PopupError::Validation(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            PopupError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            PopupError::DeadlineExceeded => (StatusCode::GATEWAY_TIMEOUT, "deadline_exceeded"),
            PopupError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
            PopupError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store_error"),
            PopupError::Serialization(_) | PopupError::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            metrics::counter!("api.errors").increment(1);
        } else {
            warn!(error = %self.0, status = status.as_u16(), "Request rejected");
            metrics::counter!("api.client_errors").increment(1);
        }

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
