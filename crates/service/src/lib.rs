//! The request service: input validation, the lifecycle state machine,
//! authorization checks, and audit emission.
//!
//! Every state change goes through the store's conditional update;
//! the expected-status guard is the concurrency control. Each
//! successful transition emits exactly one audit event, written after
//! the transition commits.

pub mod error;
pub mod handoff;
pub mod service;

pub use {
    error::{Result, ServiceError},
    handoff::{NoopHandle, OrchestratorHandle},
    service::RequestService,
};
