use stint_identity::IdentityError;
use thiserror::Error;

/// Domain failures of the request service, one variant per error kind
/// the API surface distinguishes.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed input, missing required field, duration over limit.
    #[error("{message}")]
    Validation { message: String },

    /// Actor lacks approver membership or self-approval is blocked.
    #[error("{message}")]
    Authorization { message: String },

    #[error("{what} not found")]
    NotFound { what: String },

    /// A conditional update lost its race; the stored status moved on.
    #[error("{message}")]
    Conflict { message: String },

    /// The identity provider failed terminally.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Infrastructure failure in the store.
    #[error(transparent)]
    Store(stint_store::Error),
}

impl ServiceError {
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::Authorization {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }
}

impl From<stint_store::Error> for ServiceError {
    fn from(e: stint_store::Error) -> Self {
        use stint_store::Error as E;
        match e {
            E::DuplicateRequest { request_id } => {
                Self::conflict(format!("request {request_id} already exists"))
            },
            E::RequestNotFound { request_id } => Self::not_found(format!("request {request_id}")),
            E::StatusConflict {
                request_id,
                expected,
                actual,
            } => Self::conflict(format!(
                "request {request_id} is {actual}, not {expected}"
            )),
            E::BadPageToken => Self::validation("invalid nextToken"),
            E::UnfilteredQuery => Self::validation(
                "at least one of channelId, accountId, requesterEmail, or status is required",
            ),
            other => Self::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
