//! Request lifecycle operations and channel configuration.

use std::{collections::BTreeMap, sync::Arc};

use {
    chrono::DateTime,
    tracing::{info, warn},
    uuid::Uuid,
};

use {
    stint_identity::{IdentityError, IdentityGateway},
    stint_notify::CallbackSink,
    stint_protocol::{
        api::{
            ActorBody, BindAccountBody, CallbackPayload, CreateRequestBody, RequestFilters,
            RequestPage, SetApproversBody,
        },
        audit::{AuditEvent, AuditEventType},
        binding::ChannelBinding,
        now_secs,
        request::{AccessRequest, Justification, RequestStatus},
        DEFAULT_MAX_REQUEST_HOURS,
    },
    stint_store::{Cursor, RequestQuery, Store, TransitionFields},
};

use crate::{
    error::{Result, ServiceError},
    handoff::OrchestratorHandle,
};

/// Validates inputs, drives the state machine through the store's
/// conditional updates, and audits every change.
pub struct RequestService {
    store: Store,
    identity: IdentityGateway,
    callbacks: Arc<dyn CallbackSink>,
    handoff: Arc<dyn OrchestratorHandle>,
}

impl RequestService {
    pub fn new(
        store: Store,
        identity: IdentityGateway,
        callbacks: Arc<dyn CallbackSink>,
        handoff: Arc<dyn OrchestratorHandle>,
    ) -> Self {
        Self {
            store,
            identity,
            callbacks,
            handoff,
        }
    }

    // ── Channel configuration ────────────────────────────────────────────────

    /// Bind an account to a channel, or update the binding in place.
    /// An account can be bound to at most one channel at a time.
    pub async fn bind_account(&self, body: BindAccountBody) -> Result<ChannelBinding> {
        let channel_id = required(&body.channel_id, "channelId")?;
        let account_id = required(&body.account_id, "accountId")?;
        let max_request_hours = body.max_request_hours.unwrap_or(DEFAULT_MAX_REQUEST_HOURS);
        if max_request_hours < 1 {
            return Err(ServiceError::validation("maxRequestHours must be at least 1"));
        }

        if let Some(existing) = self.store.find_binding_for_account(&account_id).await?
            && existing.channel_id != channel_id
        {
            return Err(ServiceError::conflict(format!(
                "account {account_id} is already bound to channel {}",
                existing.channel_id
            )));
        }

        let binding = ChannelBinding {
            channel_id,
            account_id,
            approver_ids: dedup(body.approver_ids),
            allow_self_approval: body.allow_self_approval,
            max_request_hours,
            updated_at: now_secs(),
        };
        self.store.put_binding(&binding).await?;
        info!(
            channel_id = %binding.channel_id,
            account_id = %binding.account_id,
            approvers = binding.approver_ids.len(),
            "account bound"
        );
        Ok(binding)
    }

    /// Replace the approver list on every binding of a channel.
    pub async fn set_approvers(&self, body: SetApproversBody) -> Result<Vec<ChannelBinding>> {
        let channel_id = required(&body.channel_id, "channelId")?;
        let approvers = dedup(body.approver_ids);

        let existing = self.store.list_bindings_for_channel(&channel_id).await?;
        if existing.is_empty() {
            return Err(ServiceError::not_found(format!(
                "bindings for channel {channel_id}"
            )));
        }
        Ok(self
            .store
            .set_channel_approvers(&channel_id, &approvers, now_secs())
            .await?)
    }

    pub async fn list_accounts(&self, channel_id: &str) -> Result<Vec<ChannelBinding>> {
        let channel_id = required(channel_id, "channelId")?;
        Ok(self.store.list_bindings_for_channel(&channel_id).await?)
    }

    // ── Request lifecycle ────────────────────────────────────────────────────

    /// Create a request in PENDING. The requester's provider identity
    /// is resolved here, once; an unresolvable user fails the creation
    /// and persists nothing.
    pub async fn create_request(&self, body: CreateRequestBody) -> Result<AccessRequest> {
        let account_id = required(&body.account_id, "accountId")?;
        let channel_id = required(&body.channel_id, "channelId")?;
        let requester_chat_id = required(&body.requester_chat_id, "requesterChatId")?;
        let requester_email = required(&body.requester_email, "requesterEmail")?;

        let justification = Justification {
            ticket: trimmed(body.ticket),
            reason: trimmed(body.reason),
        };
        if justification.is_empty() {
            return Err(ServiceError::validation(
                "justification requires a ticket reference or a reason",
            ));
        }

        if body.requested_duration_minutes < 1 {
            return Err(ServiceError::validation(
                "requestedDurationMinutes must be at least 1",
            ));
        }

        let binding = self
            .store
            .get_binding(&channel_id, &account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "binding for channel {channel_id} and account {account_id}"
                ))
            })?;
        if body.requested_duration_minutes > binding.max_duration_minutes() {
            return Err(ServiceError::validation(format!(
                "requested duration {}m exceeds the channel limit of {}m",
                body.requested_duration_minutes,
                binding.max_duration_minutes()
            )));
        }

        let identity_user_id = match self.identity.lookup_user(&requester_email).await {
            Ok(id) => id,
            Err(e @ (IdentityError::UserNotFound { .. } | IdentityError::AmbiguousUser { .. })) => {
                return Err(ServiceError::validation(e.to_string()));
            },
            Err(e) => return Err(e.into()),
        };

        let created_at = now_secs();
        let request = AccessRequest {
            request_id: Uuid::new_v4().to_string(),
            account_id,
            channel_id,
            requester_chat_id,
            requester_email,
            justification,
            requested_duration_minutes: body.requested_duration_minutes,
            status: RequestStatus::Pending,
            created_at,
            end_time: created_at + body.requested_duration_minutes * 60,
            identity_user_id,
            approved_at: None,
            denied_at: None,
            grant_time: None,
            revoked_at: None,
            expired_at: None,
            approver_chat_id: None,
            approver_email: None,
            error_details: None,
        };
        self.store.create_request(&request).await?;

        let details = BTreeMap::from([
            ("durationMinutes".to_string(), request.requested_duration_minutes.to_string()),
            ("justification".to_string(), request.justification.summary()),
        ]);
        self.audit(
            &request,
            AuditEventType::Requested,
            &request.requester_chat_id,
            &request.requester_email,
            details,
        )
        .await;

        info!(
            request_id = %request.request_id,
            account_id = %request.account_id,
            channel_id = %request.channel_id,
            duration_minutes = request.requested_duration_minutes,
            "request created"
        );
        Ok(request)
    }

    /// Approve a pending request and hand it to the orchestrator.
    /// Approver membership is evaluated against the binding as it is
    /// now, not as it was at creation.
    pub async fn approve(&self, request_id: &str, actor: ActorBody) -> Result<AccessRequest> {
        let request = self.fetch(request_id).await?;
        let binding = self.authorize_decision(&request, &actor).await?;

        if actor.actor_chat_id == request.requester_chat_id && !binding.allow_self_approval {
            return Err(ServiceError::authorization(
                "self-approval is not allowed in this channel",
            ));
        }

        let updated = self
            .store
            .transition(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Approved,
                TransitionFields {
                    approved_at: Some(now_secs()),
                    approver_chat_id: Some(actor.actor_chat_id.clone()),
                    approver_email: Some(actor.actor_email.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.audit(
            &updated,
            AuditEventType::Approved,
            &actor.actor_chat_id,
            &actor.actor_email,
            BTreeMap::new(),
        )
        .await;

        // The reconciler is the safety net when the workflow cannot
        // start; the approval itself stands.
        if let Err(e) = self.handoff.start(&updated).await {
            warn!(request_id, error = %e, "orchestrator handoff failed");
        }

        info!(request_id, approver = %actor.actor_chat_id, "request approved");
        Ok(updated)
    }

    /// Deny a pending request. Same membership check as approval; the
    /// self-approval carve-out does not apply. No callback is sent —
    /// the plugin updates its card from its own dialog flow.
    pub async fn deny(&self, request_id: &str, actor: ActorBody) -> Result<AccessRequest> {
        let request = self.fetch(request_id).await?;
        self.authorize_decision(&request, &actor).await?;

        let updated = self
            .store
            .transition(
                request_id,
                RequestStatus::Pending,
                RequestStatus::Denied,
                TransitionFields {
                    denied_at: Some(now_secs()),
                    approver_chat_id: Some(actor.actor_chat_id.clone()),
                    approver_email: Some(actor.actor_email.clone()),
                    ..Default::default()
                },
            )
            .await?;

        self.audit(
            &updated,
            AuditEventType::Denied,
            &actor.actor_chat_id,
            &actor.actor_email,
            BTreeMap::new(),
        )
        .await;

        info!(request_id, denier = %actor.actor_chat_id, "request denied");
        Ok(updated)
    }

    /// Manually revoke a granted request. Revoking a request that is
    /// already REVOKED or EXPIRED is a successful no-op.
    pub async fn revoke(&self, request_id: &str, actor: ActorBody) -> Result<AccessRequest> {
        let request = self.fetch(request_id).await?;

        if matches!(request.status, RequestStatus::Revoked | RequestStatus::Expired) {
            return Ok(request);
        }
        if request.status != RequestStatus::Granted {
            return Err(ServiceError::conflict(format!(
                "request {request_id} is {}, not GRANTED",
                request.status
            )));
        }

        if let Err(e) = self
            .identity
            .revoke(&request.account_id, &request.identity_user_id)
            .await
        {
            self.fail_revoke(&request, &actor, &e).await;
            return Err(e.into());
        }

        let updated = match self
            .store
            .transition(
                request_id,
                RequestStatus::Granted,
                RequestStatus::Revoked,
                TransitionFields {
                    revoked_at: Some(now_secs()),
                    ..Default::default()
                },
            )
            .await
        {
            Ok(updated) => updated,
            Err(e) if e.is_conflict() => {
                // Another actor finished first (typically the scheduled
                // expiry): the access is gone either way.
                return Ok(self.fetch(request_id).await?);
            },
            Err(e) => return Err(e.into()),
        };

        self.audit(
            &updated,
            AuditEventType::Revoked,
            &actor.actor_chat_id,
            &actor.actor_email,
            BTreeMap::new(),
        )
        .await;
        self.callback(&updated, &actor.actor_chat_id, BTreeMap::new()).await;

        info!(request_id, revoker = %actor.actor_chat_id, "request revoked");
        Ok(updated)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn get_request(&self, request_id: &str) -> Result<AccessRequest> {
        self.fetch(request_id).await
    }

    pub async fn list_requests(&self, filters: RequestFilters) -> Result<RequestPage> {
        let query = RequestQuery {
            channel_id: filters.channel_id.clone(),
            account_id: filters.account_id.clone(),
            requester_email: filters.requester_email.clone(),
            status: filters.status,
            created_after: parse_date(filters.start_date.as_deref())?,
            created_before: parse_date(filters.end_date.as_deref())?,
            limit: filters.limit,
            cursor: filters
                .next_token
                .as_deref()
                .map(Cursor::decode)
                .transpose()?,
        };
        let page = self.store.list_requests(&query).await?;
        Ok(RequestPage {
            items: page.items,
            next_token: page.next.map(|c| c.encode()),
            filters,
        })
    }

    pub async fn audit_trail(&self, request_id: &str) -> Result<Vec<AuditEvent>> {
        Ok(self.store.audit_for_request(request_id).await?)
    }

    // ── Internals ────────────────────────────────────────────────────────────

    async fn fetch(&self, request_id: &str) -> Result<AccessRequest> {
        self.store
            .get_request(request_id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("request {request_id}")))
    }

    /// Approve/deny share the membership rule: the actor must be an
    /// approver on the binding as it exists right now. A deleted
    /// binding fails closed.
    async fn authorize_decision(
        &self,
        request: &AccessRequest,
        actor: &ActorBody,
    ) -> Result<ChannelBinding> {
        let binding = self
            .store
            .get_binding(&request.channel_id, &request.account_id)
            .await?
            .ok_or_else(|| {
                ServiceError::authorization(format!(
                    "no binding exists for channel {} and account {}",
                    request.channel_id, request.account_id
                ))
            })?;
        if !binding.is_approver(&actor.actor_chat_id) {
            return Err(ServiceError::authorization(format!(
                "{} is not an approver for this channel",
                actor.actor_chat_id
            )));
        }
        Ok(binding)
    }

    /// Terminal identity failure during manual revoke: park the request
    /// in ERROR and tell the plugin.
    async fn fail_revoke(&self, request: &AccessRequest, actor: &ActorBody, error: &IdentityError) {
        let details = error.to_string();
        let updated = self
            .store
            .transition(
                &request.request_id,
                RequestStatus::Granted,
                RequestStatus::Error,
                TransitionFields {
                    error_details: Some(details.clone()),
                    ..Default::default()
                },
            )
            .await;
        match updated {
            Ok(updated) => {
                let audit_details = BTreeMap::from([
                    ("phase".to_string(), "revoke".to_string()),
                    ("error".to_string(), details),
                ]);
                self.audit(
                    &updated,
                    AuditEventType::Error,
                    &actor.actor_chat_id,
                    &actor.actor_email,
                    audit_details.clone(),
                )
                .await;
                self.callback(&updated, &actor.actor_chat_id, audit_details).await;
            },
            Err(e) => {
                warn!(
                    request_id = %request.request_id,
                    error = %e,
                    "could not mark request as errored after failed revoke"
                );
            },
        }
    }

    /// Write the audit event for a committed transition. Audit follows
    /// commit; a write failure here is logged loudly but cannot undo
    /// the transition.
    async fn audit(
        &self,
        request: &AccessRequest,
        event_type: AuditEventType,
        actor_chat_id: &str,
        actor_email: &str,
        details: BTreeMap<String, String>,
    ) {
        let event = AuditEvent {
            request_id: request.request_id.clone(),
            event_id: Uuid::new_v4().to_string(),
            event_time: now_secs(),
            event_type,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor_chat_id: actor_chat_id.to_string(),
            actor_email: actor_email.to_string(),
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

    async fn callback(
        &self,
        request: &AccessRequest,
        actor: &str,
        details: BTreeMap<String, String>,
    ) {
        let payload = CallbackPayload {
            request_id: request.request_id.clone(),
            status: request.status,
            account_id: request.account_id.clone(),
            channel_id: request.channel_id.clone(),
            actor: actor.to_string(),
            details,
        };
        if let Err(e) = self.callbacks.deliver(&payload).await {
            warn!(request_id = %request.request_id, error = %e, "callback delivery failed");
        }
    }
}

fn required(value: &str, field: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ServiceError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    ids.into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

/// RFC3339 date filter → epoch seconds.
fn parse_date(value: Option<&str>) -> Result<Option<i64>> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.timestamp()))
            .map_err(|_| ServiceError::validation(format!("invalid RFC3339 date: {raw}"))),
    }
}
