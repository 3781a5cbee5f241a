//! API error responses.
//!
//! Every error body is `{"error": "<message>"}`. Raw provider and internal
//! error text never reaches clients; details go to the logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use careplan_billing::BillingError;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    /// Transient failure; the caller (or the payment provider's retry
    /// machinery) should try again.
    #[error("service temporarily unavailable")]
    ServiceUnavailable,

    /// The payment provider rejected or failed the request.
    #[error("{0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::ServiceUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service temporarily unavailable, please retry".to_string(),
            ),
            ApiError::Upstream(m) => (StatusCode::BAD_GATEWAY, m.clone()),
            ApiError::Internal(m) => {
                tracing::error!(error = %m, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::WebhookSignatureInvalid => {
                ApiError::BadRequest("invalid webhook signature".to_string())
            }
            BillingError::WebhookPayloadInvalid(_) => {
                ApiError::BadRequest("malformed webhook payload".to_string())
            }
            BillingError::InvalidInput(m) => ApiError::BadRequest(m),
            BillingError::ProfileNotFoundAfterRetries { .. } => {
                ApiError::NotFound("profile not ready yet, try again later".to_string())
            }
            BillingError::Provider(m) => {
                tracing::error!(error = %m, "Payment provider error");
                ApiError::Upstream("payment provider request failed".to_string())
            }
            BillingError::Database(m) => {
                tracing::error!(error = %m, "Database error");
                ApiError::ServiceUnavailable
            }
            BillingError::Config(m) => ApiError::Internal(m),
        }
    }
}
