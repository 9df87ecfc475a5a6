//! Periodic sweep of grants that outlived their end time.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use {
    tokio::{task::JoinHandle, time::interval},
    tracing::{error, info, warn},
    uuid::Uuid,
};

use {
    stint_identity::IdentityGateway,
    stint_notify::CallbackSink,
    stint_protocol::{
        RECONCILE_INTERVAL_SECS,
        api::CallbackPayload,
        audit::{AuditEvent, AuditEventType},
        now_secs,
        request::{AccessRequest, RequestStatus},
    },
    stint_store::{Store, TransitionFields},
};

const SYSTEM_ACTOR: &str = "system";

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Overdue grants examined.
    pub swept: usize,
    /// Moved to EXPIRED this sweep.
    pub expired: usize,
    /// Already handled by a concurrent actor.
    pub already_handled: usize,
    /// Moved to ERROR because the provider revoke failed.
    pub errored: usize,
}

/// Sweeps `GRANTED ∧ end_time ≤ now` and drives each through revoke.
///
/// Grants are never retried here — only revokes. A request that never
/// reached GRANTED stays in ERROR until human action.
pub struct Reconciler {
    store: Store,
    identity: IdentityGateway,
    callbacks: Arc<dyn CallbackSink>,
    interval: Duration,
}

impl Reconciler {
    pub fn new(store: Store, identity: IdentityGateway, callbacks: Arc<dyn CallbackSink>) -> Self {
        Self {
            store,
            identity,
            callbacks,
            interval: Duration::from_secs(RECONCILE_INTERVAL_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run sweeps forever on the configured interval.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(self.interval);
            loop {
                tick.tick().await;
                match self.run_once().await {
                    Ok(summary) if summary.errored > 0 => {
                        // Per-request failures were already logged; the
                        // tick still counts as processed.
                        warn!(?summary, "reconcile tick finished with errors");
                    },
                    Ok(summary) => {
                        if summary.swept > 0 {
                            info!(?summary, "reconcile tick finished");
                        }
                    },
                    Err(e) => error!(error = %e, "reconcile tick failed"),
                }
            }
        })
    }

    /// One sweep. A failure on one request never stops the others.
    pub async fn run_once(&self) -> anyhow::Result<ReconcileSummary> {
        let overdue = self.store.expired_grants(now_secs()).await?;
        let mut summary = ReconcileSummary {
            swept: overdue.len(),
            ..Default::default()
        };

        for request in overdue {
            match self.expire(&request).await {
                Outcome::Expired => summary.expired += 1,
                Outcome::AlreadyHandled => summary.already_handled += 1,
                Outcome::Errored => summary.errored += 1,
            }
        }
        Ok(summary)
    }

    async fn expire(&self, request: &AccessRequest) -> Outcome {
        let request_id = request.request_id.as_str();

        if let Err(e) = self
            .identity
            .revoke(&request.account_id, &request.identity_user_id)
            .await
        {
            warn!(request_id, error = %e, "reconciler revoke failed");
            self.park_in_error(request, &e.to_string()).await;
            return Outcome::Errored;
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
                let details = BTreeMap::from([("expiredBy".to_string(), "reconciler".to_string())]);
                self.audit(&updated, AuditEventType::Expired, details).await;
                self.callback(&updated, BTreeMap::new()).await;
                info!(request_id, "reconciler expired overdue grant");
                Outcome::Expired
            },
            Err(e) if e.is_conflict() => {
                // The workflow or a manual revoke got there first.
                Outcome::AlreadyHandled
            },
            Err(e) => {
                error!(request_id, error = %e, "could not record expiry");
                Outcome::Errored
            },
        }
    }

    async fn park_in_error(&self, request: &AccessRequest, reason: &str) {
        match self
            .store
            .transition(
                &request.request_id,
                RequestStatus::Granted,
                RequestStatus::Error,
                TransitionFields {
                    error_details: Some(reason.to_string()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(updated) => {
                let details = BTreeMap::from([
                    ("phase".to_string(), "revoke".to_string()),
                    ("error".to_string(), reason.to_string()),
                ]);
                self.audit(&updated, AuditEventType::Error, details.clone()).await;
                self.callback(&updated, details).await;
            },
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "could not mark overdue grant as errored"
                );
            },
        }
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

enum Outcome {
    Expired,
    AlreadyHandled,
    Errored,
}
