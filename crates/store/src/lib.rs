//! Durable persistence for the access controller.
//!
//! One SQLite database holds all four entity kinds: channel bindings,
//! access requests, audit events, and replay nonces. The store's
//! conditional-update primitive is the only way a request's status
//! moves; it linearizes concurrent transitions per `request_id`.

pub mod error;
pub mod query;
pub mod requests;
pub mod sqlite;

pub use {
    error::{Error, Result},
    query::{Cursor, Page, RequestQuery},
    requests::TransitionFields,
    sqlite::Store,
};
