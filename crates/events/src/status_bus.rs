//! In-process status broadcaster with replay of the current value.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::bus::Subscription;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// The bus was closed; nothing will be delivered any more.
    #[error("status bus closed")]
    Closed,
}

/// In-memory pub/sub for status values.
///
/// - No IO, never blocks the publisher
/// - Fan-out copies to every live subscriber
/// - A new subscriber immediately receives the latest published value
#[derive(Debug)]
pub struct StatusBus<M> {
    inner: Mutex<BusState<M>>,
}

#[derive(Debug)]
struct BusState<M> {
    latest: Option<M>,
    subscribers: Vec<mpsc::UnboundedSender<M>>,
    closed: bool,
}

impl<M> StatusBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bus that already holds a current value.
    pub fn with_initial(initial: M) -> Self {
        Self {
            inner: Mutex::new(BusState {
                latest: Some(initial),
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Drop every subscriber; their streams end after draining.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    // Every mutation leaves the state consistent, so a panic elsewhere
    // while the lock was held does not invalidate it.
    fn lock(&self) -> MutexGuard<'_, BusState<M>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl<M> Default for StatusBus<M> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BusState {
                latest: None,
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }
}

impl<M> StatusBus<M>
where
    M: Clone + Send + 'static,
{
    pub fn publish(&self, message: M) -> Result<(), BusError> {
        let mut state = self.lock();
        if state.closed {
            return Err(BusError::Closed);
        }

        // Drop any dead subscribers while publishing.
        state.subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        state.latest = Some(message);

        Ok(())
    }

    pub fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.lock();
        if state.closed {
            // The sender drops here and the stream ends at once.
            tracing::debug!("subscribe on a closed status bus");
        } else {
            if let Some(latest) = state.latest.clone() {
                let _ = tx.send(latest);
            }
            state.subscribers.push(tx);
        }

        Subscription::new(rx)
    }
}
