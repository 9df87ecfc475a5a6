//! HTTP request/response bodies and the outbound callback payload.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::request::{AccessRequest, RequestStatus};

// ── Inbound bodies ───────────────────────────────────────────────────────────

/// Body of `POST /requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequestBody {
    pub account_id: String,
    pub channel_id: String,
    pub requester_chat_id: String,
    pub requester_email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub requested_duration_minutes: i64,
}

/// Body of the approve/deny/revoke endpoints: who is acting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorBody {
    pub actor_chat_id: String,
    pub actor_email: String,
}

/// Body of `POST /config/bind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindAccountBody {
    pub channel_id: String,
    pub account_id: String,
    #[serde(default)]
    pub approver_ids: Vec<String>,
    #[serde(default)]
    pub allow_self_approval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_request_hours: Option<i64>,
}

/// Body of `POST /config/approvers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetApproversBody {
    pub channel_id: String,
    pub approver_ids: Vec<String>,
}

// ── Listing ──────────────────────────────────────────────────────────────────

/// Query parameters of `GET /requests`, echoed back in the response.
///
/// At least one of `channel_id`, `account_id`, `requester_email`,
/// `status` is required; unfiltered enumeration is rejected.
/// Snake_case aliases keep older plugin builds working.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFilters {
    #[serde(alias = "channel_id", skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(alias = "account_id", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(alias = "requester_email", skip_serializing_if = "Option::is_none")]
    pub requester_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RequestStatus>,
    /// RFC3339 lower bound on creation time, inclusive.
    #[serde(alias = "start_date", skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// RFC3339 upper bound on creation time, inclusive.
    #[serde(alias = "end_date", skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(alias = "next_token", skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

impl RequestFilters {
    /// Whether at least one selective filter is present.
    pub fn has_selector(&self) -> bool {
        self.channel_id.is_some()
            || self.account_id.is_some()
            || self.requester_email.is_some()
            || self.status.is_some()
    }
}

/// Response of `GET /requests`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPage {
    pub items: Vec<AccessRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub filters: RequestFilters,
}

// ── Outbound callback ────────────────────────────────────────────────────────

/// Webhook body posted to the chat plugin on GRANTED, REVOKED, EXPIRED
/// and ERROR transitions. Never sent for DENIED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub request_id: String,
    pub status: RequestStatus,
    pub account_id: String,
    pub channel_id: String,
    /// Chat id of whoever caused the transition; `system` for automatic ones.
    pub actor: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
