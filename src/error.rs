//! Management API errors

use crate::forward::ForwardError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Errors reported by the management endpoints. The capture endpoint has no
/// error path.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request {request_id} not found in channel {channel_id}")]
    RequestNotFound {
        channel_id: String,
        request_id: String,
    },

    #[error("no forward target configured for channel {0}")]
    NoForwardTarget(String),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RequestNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::NoForwardTarget(_) => StatusCode::BAD_REQUEST,
            ApiError::Forward(ForwardError::InvalidTarget { .. })
            | ApiError::Forward(ForwardError::InvalidMethod(_)) => StatusCode::BAD_REQUEST,
            ApiError::Forward(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(status = %status, error = %self, "API request rejected");
        (
            status,
            Json(serde_json::json!({
                "error": self.to_string(),
            })),
        )
            .into_response()
    }
}
