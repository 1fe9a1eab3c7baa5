//! Error model shared by both orchestrators.

use thiserror::Error;

/// Failure reported by an injected network transport.
///
/// The orchestrators only care about one distinction: whether the failure
/// looks like the network going away (worth parking or retrying) or the
/// server actually answering with something unusable.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The client knows it has no connectivity.
    #[error("client is offline")]
    Offline,

    /// Connection refused, reset, DNS failure and the like.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete in time.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server answered with a non-success status.
    #[error("API error ({0}): {1}")]
    Api(u16, String),

    /// The server answered but the body could not be understood.
    #[error("parse error: {0}")]
    Parse(String),
}

impl TransportError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api(status, body.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// True for failures caused by connectivity rather than by the server.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Offline | Self::Network(_) | Self::Timeout(_))
    }
}

/// Errors raised by the core building blocks themselves.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
