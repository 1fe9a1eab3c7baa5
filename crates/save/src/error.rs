//! Save failure taxonomy.

use stagehand_core::TransportError;
use thiserror::Error;

/// Why a single save attempt failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SaveError {
    /// The snapshot provider could not produce a snapshot.
    #[error("snapshot provider failed: {0}")]
    Snapshot(String),

    /// The snapshot is not a JSON object.
    #[error("snapshot must be a JSON object")]
    NotAnObject,

    /// A field the service needs to identify the document is absent or blank.
    #[error("snapshot is missing required field `{0}`")]
    MissingField(String),

    /// A create call succeeded without handing back an identifier.
    #[error("create response did not include a document identifier")]
    MissingAssignedId,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SaveError {
    /// Validation and malformed-response failures will not fix themselves.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            Self::NotAnObject | Self::MissingField(_) | Self::MissingAssignedId
        )
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_network())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let offline = SaveError::from(TransportError::Offline);
        assert!(offline.is_network());
        assert!(offline.is_retriable());

        let server = SaveError::from(TransportError::api(503, "unavailable"));
        assert!(!server.is_network());
        assert!(server.is_retriable());

        assert!(!SaveError::MissingField("name".into()).is_retriable());
        assert!(!SaveError::MissingAssignedId.is_retriable());
        assert!(SaveError::Snapshot("editor busy".into()).is_retriable());
    }
}
