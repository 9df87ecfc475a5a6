//! Append-only audit events.
//!
//! Every status change on a request produces exactly one event; events
//! are never mutated or deleted after the fact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// What happened. Mirrors the request lifecycle one-for-one, plus
/// `Requested` for creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    Requested,
    Approved,
    Denied,
    Granted,
    Revoked,
    Expired,
    Error,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "REQUESTED",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
            Self::Granted => "GRANTED",
            Self::Revoked => "REVOKED",
            Self::Expired => "EXPIRED",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REQUESTED" => Some(Self::Requested),
            "APPROVED" => Some(Self::Approved),
            "DENIED" => Some(Self::Denied),
            "GRANTED" => Some(Self::Granted),
            "REVOKED" => Some(Self::Revoked),
            "EXPIRED" => Some(Self::Expired),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record. Ordered within a request by `(event_time, event_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub request_id: String,
    pub event_id: String,
    pub event_time: i64,
    pub event_type: AuditEventType,
    pub account_id: String,
    pub channel_id: String,
    pub actor_chat_id: String,
    pub actor_email: String,
    /// Per-transition context: justification on REQUESTED, phase tag and
    /// provider reason on ERROR, and so on. BTreeMap keeps key order stable.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}
