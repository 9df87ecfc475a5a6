use thiserror::Error;

/// Terminal failures surfaced by the identity gateway. Transient
/// provider conditions are retried internally and only become
/// [`IdentityError::RetriesExhausted`] once the budget is gone.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("no directory user matches {email}")]
    UserNotFound { email: String },

    #[error("multiple directory users match {email}")]
    AmbiguousUser { email: String },

    #[error("identity provider failed: {reason}")]
    Provider { reason: String },

    #[error("identity operation still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: usize, last: String },
}

impl IdentityError {
    #[must_use]
    pub fn user_not_found(email: impl Into<String>) -> Self {
        Self::UserNotFound {
            email: email.into(),
        }
    }

    #[must_use]
    pub fn ambiguous_user(email: impl Into<String>) -> Self {
        Self::AmbiguousUser {
            email: email.into(),
        }
    }

    #[must_use]
    pub fn provider(reason: impl Into<String>) -> Self {
        Self::Provider {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IdentityError>;
