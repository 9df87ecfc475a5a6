//! Gateway to the external identity provider.
//!
//! The provider's API is asynchronous: submitting an assignment create
//! or delete returns an operation id, and the terminal state is
//! reached by polling. [`gateway::IdentityGateway`] wraps any
//! [`client::DirectoryClient`] with the polling loop, idempotency
//! handling, and the outer retry schedule; [`memory::MemoryDirectory`]
//! is the in-process provider used by tests and dev deployments.

pub mod client;
pub mod error;
pub mod gateway;
pub mod memory;

pub use {
    client::{ClientError, DirectoryClient, DirectoryUser, OperationStatus},
    error::{IdentityError, Result},
    gateway::{IdentityGateway, PollSettings},
    memory::MemoryDirectory,
};
