//! Shared domain model for the stint access controller.
//!
//! Everything that crosses a crate or wire boundary lives here:
//! - [`request::AccessRequest`] — one time-bounded access request
//! - [`binding::ChannelBinding`] — a chat channel ↔ cloud account binding
//! - [`audit::AuditEvent`] — append-only record of a state transition
//! - [`api`] — HTTP request/response bodies and the webhook callback payload
//!
//! All wire types serialize as camelCase JSON.

pub mod api;
pub mod audit;
pub mod binding;
pub mod request;

use std::time::{SystemTime, UNIX_EPOCH};

// ── Constants ────────────────────────────────────────────────────────────────

/// Maximum accepted clock skew between plugin and controller, in seconds.
pub const SKEW_WINDOW_SECS: i64 = 300;
/// Nonce records are kept for twice the skew window.
pub const NONCE_TTL_SECS: i64 = 2 * SKEW_WINDOW_SECS;
/// Default per-binding cap on request duration, in hours.
pub const DEFAULT_MAX_REQUEST_HOURS: i64 = 4;
/// Hard cap on page size for listing queries.
pub const MAX_PAGE_SIZE: i64 = 200;
/// Default page size when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 50;
/// Reconciler sweep cadence, in seconds.
pub const RECONCILE_INTERVAL_SECS: u64 = 15 * 60;

/// Current wall clock as epoch seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
