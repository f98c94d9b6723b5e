use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, warn};

use crate::relay::RelayError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    RequestTimeout(String),

    /// Upstream rejected the dispatch; its status and body are passed through.
    #[error("Error from orchestration API: {body}")]
    Upstream { status: u16, body: String },

    #[error("🔴 Server error: {0}")]
    Server(String),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            RelayError::TaskFailed => ApiError::BadRequest(err.to_string()),
            RelayError::PollTimeout => ApiError::RequestTimeout(err.to_string()),
            RelayError::UpstreamDispatch { status, body } => ApiError::Upstream { status, body },
            other => ApiError::Server(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RequestTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            // A 2xx with an unusable body cannot be passed through as an error
            ApiError::Upstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            error!(status = status.as_u16(), error = %message, "Invocation failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "Invocation rejected");
        }

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
