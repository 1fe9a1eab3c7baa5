//! Subscriber side of a status stream.
//!
//! Components never hand out references to their internal state. Every
//! change is published as an owned copy, and each subscriber receives its
//! own copy through a [`Subscription`].
//!
//! ## Delivery
//!
//! - The current value is delivered first, at subscribe time
//! - After that, every published value in publish order
//! - Values are never coalesced; slow subscribers buffer (streams are small
//!   and short-lived, one entry per state transition)
//! - The stream ends (`recv` returns `None`) once the publisher closes

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// A subscription to a status stream.
///
/// ```ignore
/// let mut updates = orchestrator.on_status_change();
/// while let Some(details) = updates.recv().await {
///     render(details);
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message; `None` once the publisher has closed.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Take everything currently buffered.
    pub fn drain(&mut self) -> Vec<M> {
        let mut out = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            out.push(message);
        }
        out
    }
}
