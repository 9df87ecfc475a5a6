//! The per-request workflow executor.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    dashmap::DashMap,
    tokio::time::sleep,
    tracing::{debug, error, info, warn},
    uuid::Uuid,
};

use {
    stint_identity::IdentityGateway,
    stint_notify::CallbackSink,
    stint_protocol::{
        api::CallbackPayload,
        audit::{AuditEvent, AuditEventType},
        now_secs,
        request::{AccessRequest, RequestStatus},
    },
    stint_service::OrchestratorHandle,
    stint_store::{Store, TransitionFields},
};

use crate::{retry::RetryPolicy, step::Step};

/// Actor recorded on automatic transitions.
const SYSTEM_ACTOR: &str = "system";

/// Runs one durable-style execution per approved request.
///
/// Executions are registered by `request_id`; starting a request that
/// already has a live execution is a no-op. Durability comes from the
/// store, not from process memory: the wait step sleeps until the
/// request's immutable `end_time`, so [`Orchestrator::resume_active`]
/// can rebuild executions after a restart and wait only the remainder.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Store,
    identity: IdentityGateway,
    callbacks: Arc<dyn CallbackSink>,
    retry: RetryPolicy,
    executions: DashMap<String, ()>,
}

impl Orchestrator {
    pub fn new(store: Store, identity: IdentityGateway, callbacks: Arc<dyn CallbackSink>) -> Self {
        Self::with_retry(store, identity, callbacks, RetryPolicy::default())
    }

    pub fn with_retry(
        store: Store,
        identity: IdentityGateway,
        callbacks: Arc<dyn CallbackSink>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                identity,
                callbacks,
                retry,
                executions: DashMap::new(),
            }),
        }
    }

    /// Start an execution for `request_id` unless one is already live.
    pub fn start(&self, request_id: &str) {
        self.start_at(request_id, Step::Validate);
    }

    /// Live execution count (used by status reporting and tests).
    pub fn active_executions(&self) -> usize {
        self.inner.executions.len()
    }

    /// Rebuild executions after a restart: APPROVED requests re-enter
    /// at the grant step, GRANTED requests at the wait step. The
    /// reconciler stays the safety net for anything missed here.
    pub async fn resume_active(&self) -> anyhow::Result<()> {
        let approved = self.inner.store.list_by_status(RequestStatus::Approved).await?;
        let granted = self.inner.store.list_by_status(RequestStatus::Granted).await?;
        let resumed = approved.len() + granted.len();

        for request in approved {
            self.start_at(&request.request_id, Step::Validate);
        }
        for request in granted {
            self.start_at(&request.request_id, Step::Wait);
        }
        if resumed > 0 {
            info!(count = resumed, "resumed in-flight workflow executions");
        }
        Ok(())
    }

    fn start_at(&self, request_id: &str, entry: Step) {
        use dashmap::mapref::entry::Entry;

        // Naming executions by request_id makes double-starts no-ops.
        match self.inner.executions.entry(request_id.to_string()) {
            Entry::Occupied(_) => {
                debug!(request_id, "execution already running, ignoring start");
                return;
            },
            Entry::Vacant(slot) => {
                slot.insert(());
            },
        }

        let inner = Arc::clone(&self.inner);
        let request_id = request_id.to_string();
        tokio::spawn(async move {
            inner.run(&request_id, entry).await;
            inner.executions.remove(&request_id);
        });
    }
}

#[async_trait]
impl OrchestratorHandle for Orchestrator {
    async fn start(&self, request: &AccessRequest) -> anyhow::Result<()> {
        Orchestrator::start(self, &request.request_id);
        Ok(())
    }
}

impl Inner {
    async fn run(&self, request_id: &str, entry: Step) {
        let mut step = entry;
        loop {
            step = match step {
                Step::Validate => self.validate(request_id).await,
                Step::Grant => self.grant(request_id).await,
                Step::NotifyGranted => self.notify_granted(request_id).await,
                Step::Wait => self.wait(request_id).await,
                Step::Revoke => self.revoke(request_id).await,
                Step::NotifyRevoked => self.notify_revoked(request_id).await,
                Step::HandleGrantError { reason } => {
                    self.handle_error(request_id, "grant", &reason).await
                },
                Step::HandleRevokeError { reason } => {
                    self.handle_error(request_id, "revoke", &reason).await
                },
                Step::Done => break,
            };
        }
        debug!(request_id, "execution finished");
    }

    async fn fetch(&self, request_id: &str) -> Option<AccessRequest> {
        match self.store.get_request(request_id).await {
            Ok(found) => found,
            Err(e) => {
                error!(request_id, error = %e, "store read failed in workflow");
                None
            },
        }
    }

    async fn validate(&self, request_id: &str) -> Step {
        match self.fetch(request_id).await {
            Some(request) if request.status == RequestStatus::Approved => Step::Grant,
            // A granted request means we are resuming mid-flight.
            Some(request) if request.status == RequestStatus::Granted => Step::Wait,
            Some(request) => {
                warn!(request_id, status = %request.status, "request not eligible for workflow");
                Step::Done
            },
            None => {
                warn!(request_id, "request vanished before workflow start");
                Step::Done
            },
        }
    }

    async fn grant(&self, request_id: &str) -> Step {
        let Some(request) = self.fetch(request_id).await else {
            return Step::Done;
        };

        let outcome = self
            .retry
            .run("grant", || {
                self.identity.grant(&request.account_id, &request.identity_user_id)
            })
            .await;
        if let Err(e) = outcome {
            return Step::HandleGrantError {
                reason: e.to_string(),
            };
        }

        match self
            .store
            .transition(
                request_id,
                RequestStatus::Approved,
                RequestStatus::Granted,
                TransitionFields {
                    grant_time: Some(now_secs()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(updated) => {
                self.audit(&updated, AuditEventType::Granted, BTreeMap::new()).await;
                info!(request_id, end_time = updated.end_time, "access granted");
                Step::NotifyGranted
            },
            Err(e) if e.is_conflict() => {
                // Someone else moved the request while we were granting;
                // the store's state wins.
                warn!(request_id, error = %e, "grant lost the transition race");
                Step::Done
            },
            Err(e) => {
                error!(request_id, error = %e, "could not record grant");
                Step::HandleGrantError {
                    reason: e.to_string(),
                }
            },
        }
    }

    async fn notify_granted(&self, request_id: &str) -> Step {
        if let Some(request) = self.fetch(request_id).await {
            self.callback(&request, BTreeMap::new()).await;
        }
        Step::Wait
    }

    async fn wait(&self, request_id: &str) -> Step {
        let Some(request) = self.fetch(request_id).await else {
            return Step::Done;
        };
        let remaining = request.end_time - now_secs();
        if remaining > 0 {
            debug!(request_id, remaining_secs = remaining, "waiting for expiry");
            sleep(Duration::from_secs(remaining as u64)).await;
        }
        Step::Revoke
    }

    async fn revoke(&self, request_id: &str) -> Step {
        let Some(request) = self.fetch(request_id).await else {
            return Step::Done;
        };

        // Manual revoke may have finished while we slept.
        if matches!(request.status, RequestStatus::Revoked | RequestStatus::Expired) {
            return Step::NotifyRevoked;
        }

        let outcome = self
            .retry
            .run("revoke", || {
                self.identity.revoke(&request.account_id, &request.identity_user_id)
            })
            .await;
        if let Err(e) = outcome {
            return Step::HandleRevokeError {
                reason: e.to_string(),
            };
        }

        match self
            .store
            .transition(
                request_id,
                RequestStatus::Granted,
                RequestStatus::Expired,
                TransitionFields {
                    expired_at: Some(now_secs()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(updated) => {
                let details = BTreeMap::from([("expiredBy".to_string(), "workflow".to_string())]);
                self.audit(&updated, AuditEventType::Expired, details).await;
                info!(request_id, "access expired");
            },
            Err(e) if e.is_conflict() => {
                // Manual revoke won the race; that is success here.
                debug!(request_id, "expiry lost to a concurrent transition");
            },
            Err(e) => {
                error!(request_id, error = %e, "could not record expiry");
                return Step::HandleRevokeError {
                    reason: e.to_string(),
                };
            },
        }
        Step::NotifyRevoked
    }

    async fn notify_revoked(&self, request_id: &str) -> Step {
        if let Some(request) = self.fetch(request_id).await {
            // Report whichever terminal status the store shows.
            self.callback(&request, BTreeMap::new()).await;
        }
        Step::Done
    }

    /// Park the request in ERROR. The request may still be APPROVED
    /// (grant never recorded) or GRANTED (revoke failed); try both.
    async fn handle_error(&self, request_id: &str, phase: &str, reason: &str) -> Step {
        let fields = || TransitionFields {
            error_details: Some(reason.to_string()),
            ..Default::default()
        };
        let result = match self
            .store
            .transition(request_id, RequestStatus::Approved, RequestStatus::Error, fields())
            .await
        {
            Err(e) if e.is_conflict() => {
                self.store
                    .transition(request_id, RequestStatus::Granted, RequestStatus::Error, fields())
                    .await
            },
            other => other,
        };

        match result {
            Ok(updated) => {
                let details = BTreeMap::from([
                    ("phase".to_string(), phase.to_string()),
                    ("error".to_string(), reason.to_string()),
                ]);
                self.audit(&updated, AuditEventType::Error, details.clone()).await;
                self.callback(&updated, details).await;
                error!(request_id, phase, reason, "workflow parked request in ERROR");
            },
            Err(e) => {
                // Already terminal; nothing left to compensate.
                warn!(request_id, phase, error = %e, "could not mark request as errored");
            },
        }
        Step::Done
    }

    async fn audit(
        &self,
        request: &AccessRequest,
        event_type: AuditEventType,
        details: BTreeMap<String, String>,
    ) {
        let event = AuditEvent {
            request_id: request.request_id.clone(),
            event_id: Uuid::new_v4().to_string(),
            event_time: now_secs(),
            event_type,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor_chat_id: SYSTEM_ACTOR.to_string(),
            actor_email: SYSTEM_ACTOR.to_string(),
            details,
        };
        if let Err(e) = self.store.append_audit(&event).await {
            warn!(
                request_id = %request.request_id,
                event_type = %event_type,
                error = %e,
                "failed to append audit event"
            );
        }
    }

    async fn callback(&self, request: &AccessRequest, details: BTreeMap<String, String>) {
        let payload = CallbackPayload {
            request_id: request.request_id.clone(),
            status: request.status,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor: SYSTEM_ACTOR.to_string(),
            details,
        };
        if let Err(e) = self.callbacks.deliver(&payload).await {
            warn!(request_id = %request.request_id, error = %e, "callback delivery failed");
        }
    }
}
