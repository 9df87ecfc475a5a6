//! Channel ↔ account bindings and their approval policy.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_MAX_REQUEST_HOURS;

/// Binds one chat channel to one cloud account, with the approval policy
/// that governs requests raised in that channel.
///
/// An account is bound to at most one channel at a time; the store
/// enforces this on write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelBinding {
    pub channel_id: String,
    pub account_id: String,
    /// Chat user ids allowed to approve or deny requests. Any one suffices.
    pub approver_ids: Vec<String>,
    #[serde(default)]
    pub allow_self_approval: bool,
    #[serde(default = "default_max_request_hours")]
    pub max_request_hours: i64,
    pub updated_at: i64,
}

fn default_max_request_hours() -> i64 {
    DEFAULT_MAX_REQUEST_HOURS
}

impl ChannelBinding {
    /// Maximum request duration this binding allows, in minutes.
    pub fn max_duration_minutes(&self) -> i64 {
        self.max_request_hours * 60
    }

    /// Whether `chat_id` may approve or deny requests under this binding.
    pub fn is_approver(&self, chat_id: &str) -> bool {
        self.approver_ids.iter().any(|id| id == chat_id)
    }
}
