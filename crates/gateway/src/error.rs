//! Service error → HTTP status mapping.

use {
    axum::{
        http::StatusCode,
        response::{IntoResponse, Json, Response},
    },
    tracing::error,
};

use {stint_protocol::api::ErrorBody, stint_service::ServiceError};

/// An error ready to leave the API: a status code and a message body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status = match e {
            ServiceError::Validation { .. } => StatusCode::BAD_REQUEST,
            ServiceError::Authorization { .. } => StatusCode::FORBIDDEN,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::Conflict { .. } => StatusCode::CONFLICT,
            ServiceError::Identity(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Store(ref inner) => {
                error!(error = %inner, "store failure surfaced to the API");
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };
        Self::new(status, e.to_string())
    }
}
