//! In-process identity provider for tests and dev deployments.
//!
//! Simulates the asynchronous submit/poll surface, including the
//! conflict and not-found signals the gateway's idempotency rules
//! depend on. Knobs exist to delay operation completion, fail a number
//! of submits, and force operation failures with a chosen reason.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;

use crate::client::{ClientError, DirectoryClient, DirectoryUser, OperationStatus};

#[derive(Default)]
struct Inner {
    users: Vec<DirectoryUser>,
    assignments: HashSet<(String, String)>,
    ops: HashMap<String, OpRecord>,
    polls_until_done: u32,
    submit_failures: VecDeque<ClientError>,
    op_failure_reason: Option<String>,
    submit_count: usize,
    next_op: u64,
}

struct OpRecord {
    remaining_polls: u32,
    outcome: OperationStatus,
}

/// A scriptable in-memory directory.
#[derive(Default)]
pub struct MemoryDirectory {
    inner: Mutex<Inner>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_user(&self, user_id: &str, user_name: &str, email: &str) {
        self.lock().users.push(DirectoryUser {
            user_id: user_id.into(),
            user_name: user_name.into(),
            email: email.into(),
        });
    }

    /// Seed an assignment as if a grant had already completed.
    pub fn add_assignment(&self, account_id: &str, user_id: &str) {
        self.lock()
            .assignments
            .insert((account_id.into(), user_id.into()));
    }

    pub fn has_assignment(&self, account_id: &str, user_id: &str) -> bool {
        self.lock()
            .assignments
            .contains(&(account_id.into(), user_id.into()))
    }

    pub fn assignment_count(&self) -> usize {
        self.lock().assignments.len()
    }

    pub fn submit_count(&self) -> usize {
        self.lock().submit_count
    }

    /// Operations report IN_PROGRESS for this many polls before their
    /// terminal state.
    pub fn set_polls_until_done(&self, polls: u32) {
        self.lock().polls_until_done = polls;
    }

    /// Fail the next `count` submits with clones of `error`.
    pub fn fail_submits(&self, count: usize, error: ClientError) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.submit_failures.push_back(error.clone());
        }
    }

    /// Make every subsequently submitted operation end FAILED with
    /// `reason`.
    pub fn fail_operations_with(&self, reason: &str) {
        self.lock().op_failure_reason = Some(reason.into());
    }

    fn submit(&self, mutate: impl FnOnce(&mut Inner) -> Result<(), ClientError>) -> Result<String, ClientError> {
        let mut inner = self.lock();
        inner.submit_count += 1;
        if let Some(err) = inner.submit_failures.pop_front() {
            return Err(err);
        }
        mutate(&mut inner)?;

        inner.next_op += 1;
        let op_id = format!("op-{}", inner.next_op);
        let outcome = match inner.op_failure_reason {
            Some(ref reason) => OperationStatus::Failed {
                reason: reason.clone(),
            },
            None => OperationStatus::Succeeded,
        };
        let record = OpRecord {
            remaining_polls: inner.polls_until_done,
            outcome,
        };
        inner.ops.insert(op_id.clone(), record);
        Ok(op_id)
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn find_user_by_name(&self, name: &str) -> Result<Option<DirectoryUser>, ClientError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.user_name == name)
            .cloned())
    }

    async fn find_users_by_email(&self, email: &str) -> Result<Vec<DirectoryUser>, ClientError> {
        Ok(self
            .lock()
            .users
            .iter()
            .filter(|u| u.email == email)
            .cloned()
            .collect())
    }

    async fn submit_assignment_create(
        &self,
        account_id: &str,
        user_id: &str,
    ) -> Result<String, ClientError> {
        let key = (account_id.to_string(), user_id.to_string());
        self.submit(move |inner| {
            if !inner.assignments.insert(key) {
                return Err(ClientError::Conflict("assignment already exists".into()));
            }
            Ok(())
        })
    }

    async fn submit_assignment_delete(
        &self,
        account_id: &str,
        user_id: &str,
    ) -> Result<String, ClientError> {
        let key = (account_id.to_string(), user_id.to_string());
        self.submit(move |inner| {
            if !inner.assignments.remove(&key) {
                return Err(ClientError::NotFound("no such assignment".into()));
            }
            Ok(())
        })
    }

    async fn operation_status(&self, op_id: &str) -> Result<OperationStatus, ClientError> {
        let mut inner = self.lock();
        match inner.ops.get_mut(op_id) {
            None => Err(ClientError::NotFound(format!("unknown operation {op_id}"))),
            Some(op) if op.remaining_polls > 0 => {
                op.remaining_polls -= 1;
                Ok(OperationStatus::InProgress)
            },
            Some(op) => Ok(op.outcome.clone()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_then_delete() {
        let dir = MemoryDirectory::new();
        let op = dir.submit_assignment_create("acct", "u1").await.unwrap();
        assert_eq!(dir.operation_status(&op).await.unwrap(), OperationStatus::Succeeded);
        assert!(dir.has_assignment("acct", "u1"));

        dir.submit_assignment_delete("acct", "u1").await.unwrap();
        assert!(!dir.has_assignment("acct", "u1"));
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let dir = MemoryDirectory::new();
        dir.submit_assignment_create("acct", "u1").await.unwrap();
        let err = dir.submit_assignment_create("acct", "u1").await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_in_progress_countdown() {
        let dir = MemoryDirectory::new();
        dir.set_polls_until_done(2);
        let op = dir.submit_assignment_create("acct", "u1").await.unwrap();
        assert_eq!(dir.operation_status(&op).await.unwrap(), OperationStatus::InProgress);
        assert_eq!(dir.operation_status(&op).await.unwrap(), OperationStatus::InProgress);
        assert_eq!(dir.operation_status(&op).await.unwrap(), OperationStatus::Succeeded);
    }
}
