//! Access requests and their lifecycle states.

use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`AccessRequest`].
///
/// Legal transitions form a DAG:
/// `Pending → Approved → Granted → Expired | Revoked`, with `Pending →
/// Denied` and any active state falling into `Error` on a terminal
/// grant/revoke failure. Transitions are enforced by the store's
/// conditional update, never by in-process bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Denied,
    Granted,
    Expired,
    Revoked,
    Error,
}

impl RequestStatus {
    /// Stable string form, identical to the wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Granted => "GRANTED",
            Self::Expired => "EXPIRED",
            Self::Revoked => "REVOKED",
            Self::Error => "ERROR",
        }
    }

    /// Parse the stable string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "DENIED" => Some(Self::Denied),
            "GRANTED" => Some(Self::Granted),
            "EXPIRED" => Some(Self::Expired),
            "REVOKED" => Some(Self::Revoked),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Revoked | Self::Error)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why access is being requested: a ticket reference, free text, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Justification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Justification {
    /// True when neither field carries non-whitespace content.
    pub fn is_empty(&self) -> bool {
        let blank = |o: &Option<String>| o.as_deref().is_none_or(|s| s.trim().is_empty());
        blank(&self.ticket) && blank(&self.reason)
    }

    /// Single-line summary for audit details and logs.
    pub fn summary(&self) -> String {
        match (self.ticket.as_deref(), self.reason.as_deref()) {
            (Some(t), Some(r)) => format!("{t}: {r}"),
            (Some(t), None) => t.to_string(),
            (None, Some(r)) => r.to_string(),
            (None, None) => String::new(),
        }
    }
}

/// A single time-bounded access request.
///
/// `end_time` is fixed at creation (`created_at + duration`) and never
/// moves afterwards; the per-transition timestamps are set exactly once
/// by the transition that owns them. All timestamps are epoch seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRequest {
    pub request_id: String,
    pub account_id: String,
    pub channel_id: String,
    pub requester_chat_id: String,
    pub requester_email: String,
    pub justification: Justification,
    pub requested_duration_minutes: i64,
    pub status: RequestStatus,
    pub created_at: i64,
    pub end_time: i64,
    /// Provider principal resolved once at creation.
    pub identity_user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}
