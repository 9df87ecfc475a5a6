//! The seam to the identity provider.

use async_trait::async_trait;
use thiserror::Error;

/// A user record in the provider's directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryUser {
    pub user_id: String,
    pub user_name: String,
    pub email: String,
}

/// State of a submitted assignment operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Succeeded,
    Failed { reason: String },
}

/// Errors a provider call can produce. The split matters: transient
/// kinds are retried by the gateway, conflict/not-found feed the
/// idempotency rules, and provider failures are terminal.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// The target is already in (or past) the requested state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The target does not exist at the provider.
    #[error("not found: {0}")]
    NotFound(String),

    /// Provider throttling; safe to retry.
    #[error("throttled: {0}")]
    Throttled(String),

    /// Connectivity problem; safe to retry.
    #[error("transport: {0}")]
    Transport(String),

    /// Terminal provider-side failure.
    #[error("provider failure: {0}")]
    Provider(String),
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transport(_))
    }
}

/// Raw provider operations. Implementations do no retrying and no
/// polling; the gateway owns both.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Exact match on the user-name attribute.
    async fn find_user_by_name(&self, name: &str) -> Result<Option<DirectoryUser>, ClientError>;

    /// All users carrying `email` as their email attribute.
    async fn find_users_by_email(&self, email: &str) -> Result<Vec<DirectoryUser>, ClientError>;

    /// Submit an account-assignment create; returns the operation id.
    async fn submit_assignment_create(
        &self,
        account_id: &str,
        user_id: &str,
    ) -> Result<String, ClientError>;

    /// Submit an account-assignment delete; returns the operation id.
    async fn submit_assignment_delete(
        &self,
        account_id: &str,
        user_id: &str,
    ) -> Result<String, ClientError>;

    /// Current state of a previously submitted operation.
    async fn operation_status(&self, op_id: &str) -> Result<OperationStatus, ClientError>;
}
