//! Collaborators the queue depends on, injected at construction.

use async_trait::async_trait;
use serde_json::Value;

use stagehand_core::{DocumentId, RemoteJobId, TransportError};

use crate::error::AuthError;
use crate::types::{RemoteJobStatus, SubmitResponse};

/// The remote compute service.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn submit_job(
        &self,
        payload: &Value,
        doc_id: &DocumentId,
        group_id: &str,
    ) -> Result<SubmitResponse, TransportError>;

    async fn job_status(&self, job_id: &RemoteJobId) -> Result<RemoteJobStatus, TransportError>;

    /// Best effort; the queue logs failures and moves on.
    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), TransportError>;
}

/// Makes sure credentials are fresh before a submission goes out.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn refresh_if_needed(&self) -> Result<(), AuthError>;
}

/// For services that need no authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthService for NoAuth {
    async fn refresh_if_needed(&self) -> Result<(), AuthError> {
        Ok(())
    }
}
