use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use doc_portal_core::PortalError;
use serde_json::json;

/// HTTP face of [`PortalError`].
#[derive(Debug)]
pub struct ApiError(pub PortalError);

impl From<PortalError> for ApiError {
    fn from(err: PortalError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let retryable = self.0.is_retryable();
        match self.0 {
            PortalError::PartialDelete { deleted, failed } => {
                tracing::warn!(?deleted, ?failed, "partial delete");
                (
                    StatusCode::MULTI_STATUS,
                    Json(json!({
                        "success": false,
                        "partial": true,
                        "deleted": deleted,
                        "failed": failed,
                    })),
                )
                    .into_response()
            }
            PortalError::UploadFailed {
                orphaned_preview, ..
            } => (
                StatusCode::BAD_GATEWAY,
                Json(json!({
                    "error": message,
                    "orphanedPreview": orphaned_preview,
                    "retryable": retryable,
                })),
            )
                .into_response(),
            other => {
                let status = match other {
                    PortalError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                    PortalError::AccessDenied(_) => StatusCode::FORBIDDEN,
                    PortalError::NotFound(_) => StatusCode::NOT_FOUND,
                    PortalError::SharingFailed { .. } => StatusCode::BAD_GATEWAY,
                    PortalError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    PortalError::UploadFailed { .. } | PortalError::PartialDelete { .. } => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!(error = %message, "request failed");
                }
                (
                    status,
                    Json(json!({ "error": message, "retryable": retryable })),
                )
                    .into_response()
            }
        }
    }
}
