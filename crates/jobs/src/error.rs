//! Job queue errors.

use thiserror::Error;

use stagehand_core::TransportError;

/// The auth-freshness service could not provide usable credentials.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("session expired: {0}")]
    Expired(String),

    #[error("auth refresh failed: {0}")]
    Transport(#[from] TransportError),
}

/// Why a job ended in `FAILED` before the remote service ever ran it.
///
/// Submission failures are never retried; the message ends up in
/// [`JobRecord::error`](crate::JobRecord::error).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("submission failed: {0}")]
    Submit(#[from] TransportError),

    /// The service answered successfully but without a job identifier.
    #[error("submission response carried no job id")]
    MissingJobId,
}

impl JobError {
    pub fn is_network(&self) -> bool {
        match self {
            JobError::Submit(e) | JobError::Auth(AuthError::Transport(e)) => e.is_network(),
            _ => false,
        }
    }
}
