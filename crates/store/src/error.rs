use stint_protocol::request::RequestStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("request already exists: {request_id}")]
    DuplicateRequest { request_id: String },

    #[error("request not found: {request_id}")]
    RequestNotFound { request_id: String },

    /// The conditional update's precondition failed: the stored status
    /// was not what the caller expected. Carries the actual status so
    /// orchestrator paths can decide whether the race was benign.
    #[error("status conflict on {request_id}: expected {expected}, found {actual}")]
    StatusConflict {
        request_id: String,
        expected: RequestStatus,
        actual: RequestStatus,
    },

    #[error("stored row is corrupt: {message}")]
    CorruptRow { message: String },

    #[error("invalid pagination token")]
    BadPageToken,

    /// Listing without any of channel, account, requester-email, or
    /// status. Full-table enumeration is rejected at the API surface.
    #[error("at least one of channel, account, requester email, or status is required")]
    UnfilteredQuery,
}

impl Error {
    #[must_use]
    pub fn duplicate_request(request_id: impl Into<String>) -> Self {
        Self::DuplicateRequest {
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn request_not_found(request_id: impl Into<String>) -> Self {
        Self::RequestNotFound {
            request_id: request_id.into(),
        }
    }

    #[must_use]
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::CorruptRow {
            message: message.into(),
        }
    }

    /// Whether this is the precondition-failed outcome of a conditional
    /// update (as opposed to an infrastructure failure).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StatusConflict { .. } | Self::DuplicateRequest { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
