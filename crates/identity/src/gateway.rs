//! Polling, idempotency, and retry around a [`DirectoryClient`].

use std::{sync::Arc, time::Duration};

use {
    tokio::time::{Instant, sleep},
    tracing::{debug, warn},
};

use crate::{
    client::{ClientError, DirectoryClient, OperationStatus},
    error::{IdentityError, Result},
};

/// Timing knobs. Defaults follow the provider contract; tests shrink
/// them to milliseconds.
#[derive(Debug, Clone)]
pub struct PollSettings {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Ceiling on one submit-and-poll attempt.
    pub poll_deadline: Duration,
    /// Outer retry schedule across whole attempts.
    pub retry_backoff: Vec<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            poll_deadline: Duration::from_secs(60),
            retry_backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(4),
                Duration::from_secs(16),
            ],
        }
    }
}

impl PollSettings {
    /// Millisecond-scale settings for tests.
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            poll_deadline: Duration::from_millis(200),
            retry_backoff: vec![
                Duration::from_millis(1),
                Duration::from_millis(2),
                Duration::from_millis(4),
            ],
        }
    }
}

enum Op {
    Grant,
    Revoke,
}

/// Idempotent grant/revoke against the asynchronous provider.
///
/// Grant-then-grant and revoke-then-revoke are both no-ops at the
/// provider; callers may rely on that.
#[derive(Clone)]
pub struct IdentityGateway {
    client: Arc<dyn DirectoryClient>,
    settings: PollSettings,
}

impl IdentityGateway {
    pub fn new(client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            client,
            settings: PollSettings::default(),
        }
    }

    pub fn with_settings(client: Arc<dyn DirectoryClient>, settings: PollSettings) -> Self {
        Self { client, settings }
    }

    /// Resolve an email to the provider's user id: user-name attribute
    /// first, unique email attribute second.
    pub async fn lookup_user(&self, email: &str) -> Result<String> {
        if let Some(user) = self
            .client
            .find_user_by_name(email)
            .await
            .map_err(map_lookup_error)?
        {
            return Ok(user.user_id);
        }

        let mut matches = self
            .client
            .find_users_by_email(email)
            .await
            .map_err(map_lookup_error)?;
        match matches.len() {
            0 => Err(IdentityError::user_not_found(email)),
            1 => Ok(matches.remove(0).user_id),
            _ => Err(IdentityError::ambiguous_user(email)),
        }
    }

    /// Create the principal→account assignment.
    pub async fn grant(&self, account_id: &str, user_id: &str) -> Result<()> {
        self.execute(Op::Grant, account_id, user_id).await
    }

    /// Delete the principal→account assignment. Already-deleted is
    /// success.
    pub async fn revoke(&self, account_id: &str, user_id: &str) -> Result<()> {
        self.execute(Op::Revoke, account_id, user_id).await
    }

    async fn execute(&self, op: Op, account_id: &str, user_id: &str) -> Result<()> {
        let mut last_failure = String::new();
        let attempts = self.settings.retry_backoff.len() + 1;

        for (attempt, backoff) in std::iter::once(None)
            .chain(self.settings.retry_backoff.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = backoff {
                sleep(*delay).await;
            }

            match self.attempt(&op, account_id, user_id).await {
                Ok(()) => return Ok(()),
                Err(AttemptError::Terminal(reason)) => {
                    return Err(IdentityError::provider(reason));
                },
                Err(AttemptError::Transient(reason)) => {
                    warn!(
                        account_id,
                        user_id,
                        attempt = attempt + 1,
                        %reason,
                        "identity attempt failed, will retry"
                    );
                    last_failure = reason;
                },
            }
        }

        Err(IdentityError::RetriesExhausted {
            attempts,
            last: last_failure,
        })
    }

    /// One submit-and-poll round.
    async fn attempt(
        &self,
        op: &Op,
        account_id: &str,
        user_id: &str,
    ) -> std::result::Result<(), AttemptError> {
        let submit = match op {
            Op::Grant => self.client.submit_assignment_create(account_id, user_id).await,
            Op::Revoke => self.client.submit_assignment_delete(account_id, user_id).await,
        };

        let op_id = match submit {
            Ok(id) => id,
            // Already in the desired state at the provider.
            Err(ClientError::Conflict(reason)) => {
                debug!(account_id, user_id, %reason, "assignment already in desired state");
                return Ok(());
            },
            Err(ClientError::NotFound(reason)) if matches!(op, Op::Revoke) => {
                debug!(account_id, user_id, %reason, "assignment already deleted");
                return Ok(());
            },
            Err(e) if e.is_retryable() => return Err(AttemptError::Transient(e.to_string())),
            Err(e) => return Err(AttemptError::Terminal(e.to_string())),
        };

        let deadline = Instant::now() + self.settings.poll_deadline;
        loop {
            match self.client.operation_status(&op_id).await {
                Ok(OperationStatus::Succeeded) => return Ok(()),
                Ok(OperationStatus::Failed { reason }) => {
                    if matches!(op, Op::Revoke) && is_already_satisfied(&reason) {
                        debug!(account_id, user_id, %reason, "revoke reported already satisfied");
                        return Ok(());
                    }
                    return Err(AttemptError::Terminal(reason));
                },
                Ok(OperationStatus::InProgress) => {},
                Err(e) if e.is_retryable() => return Err(AttemptError::Transient(e.to_string())),
                Err(e) => return Err(AttemptError::Terminal(e.to_string())),
            }

            if Instant::now() >= deadline {
                return Err(AttemptError::Transient(format!(
                    "operation {op_id} still in progress after {:?}",
                    self.settings.poll_deadline
                )));
            }
            sleep(self.settings.poll_interval).await;
        }
    }
}

enum AttemptError {
    Transient(String),
    Terminal(String),
}

/// Lookup calls aren't retried by the gateway; any client error is terminal.
fn map_lookup_error(e: ClientError) -> IdentityError {
    IdentityError::provider(e.to_string())
}

/// Provider phrasings that mean "the assignment is already gone".
fn is_already_satisfied(reason: &str) -> bool {
    reason.contains("ConflictException") || reason.contains("ResourceNotFoundException")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::memory::MemoryDirectory;

    fn gateway(dir: Arc<MemoryDirectory>) -> IdentityGateway {
        IdentityGateway::with_settings(dir, PollSettings::fast())
    }

    #[tokio::test]
    async fn test_lookup_by_user_name() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user("u-1", "r@example.com", "r@example.com");
        let id = gateway(dir).lookup_user("r@example.com").await.unwrap();
        assert_eq!(id, "u-1");
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_email() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user("u-2", "rachel", "r@example.com");
        let id = gateway(dir).lookup_user("r@example.com").await.unwrap();
        assert_eq!(id, "u-2");
    }

    #[tokio::test]
    async fn test_lookup_ambiguous_email_fails() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_user("u-1", "a", "shared@example.com");
        dir.add_user("u-2", "b", "shared@example.com");
        let err = gateway(dir).lookup_user("shared@example.com").await.unwrap_err();
        assert!(matches!(err, IdentityError::AmbiguousUser { .. }));
    }

    #[tokio::test]
    async fn test_lookup_unknown_fails() {
        let dir = Arc::new(MemoryDirectory::new());
        let err = gateway(dir).lookup_user("ghost@example.com").await.unwrap_err();
        assert!(matches!(err, IdentityError::UserNotFound { .. }));
    }

    #[tokio::test]
    async fn test_grant_polls_to_success() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.set_polls_until_done(3);
        gateway(Arc::clone(&dir)).grant("123456789012", "u-1").await.unwrap();
        assert!(dir.has_assignment("123456789012", "u-1"));
    }

    #[tokio::test]
    async fn test_grant_twice_is_noop() {
        let dir = Arc::new(MemoryDirectory::new());
        let gw = gateway(Arc::clone(&dir));
        gw.grant("123456789012", "u-1").await.unwrap();
        gw.grant("123456789012", "u-1").await.unwrap();
        assert_eq!(dir.assignment_count(), 1);
    }

    #[tokio::test]
    async fn test_revoke_absent_assignment_is_success() {
        let dir = Arc::new(MemoryDirectory::new());
        gateway(dir).revoke("123456789012", "u-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failures_retried() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.fail_submits(2, ClientError::Throttled("slow down".into()));
        gateway(Arc::clone(&dir)).grant("123456789012", "u-1").await.unwrap();
        assert!(dir.has_assignment("123456789012", "u-1"));
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.fail_submits(1, ClientError::Provider("permission set missing".into()));
        let err = gateway(Arc::clone(&dir)).grant("123456789012", "u-1").await.unwrap_err();
        assert!(matches!(err, IdentityError::Provider { .. }));
        // Only the one submit happened; no retry burned.
        assert_eq!(dir.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted_reports_last_failure() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.fail_submits(100, ClientError::Transport("connection reset".into()));
        let err = gateway(dir).grant("123456789012", "u-1").await.unwrap_err();
        match err {
            IdentityError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.contains("connection reset"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_revoke_failed_op_with_not_found_reason_is_success() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.add_assignment("123456789012", "u-1");
        dir.fail_operations_with("ResourceNotFoundException: assignment gone");
        gateway(dir).revoke("123456789012", "u-1").await.unwrap();
    }
}
