//! Grant → wait → revoke orchestration, and the reconciler that
//! converges the system when the orchestrator could not.
//!
//! One [`orchestrator::Orchestrator`] execution runs per approved
//! request, named by `request_id` so a request can never be in two
//! executions at once. The execution walks a fixed set of steps with
//! compensating error branches; every state change still goes through
//! the store's conditional updates, so losing a race to a manual
//! revoke is benign everywhere.
//!
//! The [`reconciler::Reconciler`] sweeps `GRANTED` requests whose end
//! time has passed. It only ever revokes — a grant that never reached
//! GRANTED stays in ERROR until a human looks at it.

pub mod orchestrator;
pub mod reconciler;
pub mod retry;
pub mod step;

pub use {
    orchestrator::Orchestrator,
    reconciler::{ReconcileSummary, Reconciler},
    retry::RetryPolicy,
    step::Step,
};
