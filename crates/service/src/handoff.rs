//! Seam between approval and orchestration.

use async_trait::async_trait;

use stint_protocol::request::AccessRequest;

/// Started by the service after a successful approval. A failed start
/// is logged, never surfaced: the reconciler guarantees eventual
/// expiry even when the workflow never ran.
#[async_trait]
pub trait OrchestratorHandle: Send + Sync {
    async fn start(&self, request: &AccessRequest) -> anyhow::Result<()>;
}

/// Handle for deployments (and tests) that run the reconciler only.
pub struct NoopHandle;

#[async_trait]
impl OrchestratorHandle for NoopHandle {
    async fn start(&self, _request: &AccessRequest) -> anyhow::Result<()> {
        Ok(())
    }
}
