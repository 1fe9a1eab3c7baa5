//! Collaborators the orchestrator depends on.

use async_trait::async_trait;

use stagehand_core::TransportError;

use crate::types::{DocumentSnapshot, PersistOp, PersistOutcome};

/// Produces the current editor state on demand.
///
/// Called once per attempt, never cached, since edits may land between
/// attempts.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn document_snapshot(&self) -> anyhow::Result<DocumentSnapshot>;
}

/// Performs the actual network write.
#[async_trait]
pub trait PersistenceTransport: Send + Sync {
    /// `Create` must answer with an assigned id; `Update` need not.
    async fn persist(
        &self,
        op: &PersistOp,
        snapshot: &DocumentSnapshot,
    ) -> Result<PersistOutcome, TransportError>;
}
