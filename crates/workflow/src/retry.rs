//! Step-level retry with exponential backoff.

use std::time::Duration;

use {tokio::time::sleep, tracing::warn};

use stint_identity::IdentityError;

/// Retry schedule for the Grant and Revoke steps.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_secs(5),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Millisecond-scale policy for tests.
    pub fn fast() -> Self {
        Self {
            attempts: 3,
            base: Duration::from_millis(2),
            factor: 2,
        }
    }

    fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(self.factor.saturating_pow(attempt))
    }

    /// Run `op` up to `attempts` times. Only transient exhaustion from
    /// the identity gateway is retried here; terminal provider
    /// failures branch to the error handler immediately.
    pub async fn run<F, Fut>(&self, what: &str, mut op: F) -> Result<(), IdentityError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), IdentityError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e @ IdentityError::RetriesExhausted { .. }) if attempt + 1 < self.attempts => {
                    let delay = self.delay(attempt);
                    warn!(step = what, attempt = attempt + 1, error = %e, ?delay, "retrying step");
                    sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    #[test]
    fn test_delay_growth() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0), Duration::from_secs(5));
        assert_eq!(p.delay(1), Duration::from_secs(10));
        assert_eq!(p.delay(2), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_transient_exhaustion_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = RetryPolicy::fast()
            .run("grant", move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(IdentityError::RetriesExhausted {
                            attempts: 4,
                            last: "throttled".into(),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = RetryPolicy::fast()
            .run("grant", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(IdentityError::provider("permission set missing")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_budget_respected() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = RetryPolicy::fast()
            .run("revoke", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(IdentityError::RetriesExhausted {
                        attempts: 4,
                        last: "still throttled".into(),
                    })
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
