//! In-memory persistence backend for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use stagehand_core::{DocumentId, TransportError};

use crate::transport::PersistenceTransport;
use crate::types::{DocumentSnapshot, PersistOp, PersistOutcome};

/// A persistence service living in process memory.
///
/// - Create assigns `doc-1`, `doc-2`, ... and stores the snapshot
/// - Update overwrites the stored snapshot (unknown ids are a 404)
/// - Failures queued with [`fail_next`](Self::fail_next) are returned first
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    documents: HashMap<DocumentId, DocumentSnapshot>,
    next_id: u64,
    injected: VecDeque<TransportError>,
    calls: Vec<PersistOp>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with `error` instead of touching storage.
    pub fn fail_next(&self, error: TransportError) {
        if let Ok(mut state) = self.state.lock() {
            state.injected.push_back(error);
        }
    }

    pub fn document(&self, id: &DocumentId) -> Option<DocumentSnapshot> {
        self.state.lock().ok()?.documents.get(id).cloned()
    }

    /// Every op received, failed ones included.
    pub fn calls(&self) -> Vec<PersistOp> {
        self.state
            .lock()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PersistenceTransport for InMemoryPersistence {
    async fn persist(
        &self,
        op: &PersistOp,
        snapshot: &DocumentSnapshot,
    ) -> Result<PersistOutcome, TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TransportError::network("in-memory store poisoned"))?;
        state.calls.push(op.clone());

        if let Some(error) = state.injected.pop_front() {
            return Err(error);
        }

        match op {
            PersistOp::Create => {
                state.next_id += 1;
                let id = DocumentId::parse(format!("doc-{}", state.next_id))
                    .map_err(|e| TransportError::parse(e.to_string()))?;
                state.documents.insert(id.clone(), snapshot.clone());
                Ok(PersistOutcome::created(id))
            }
            PersistOp::Update(id) => match state.documents.get_mut(id) {
                Some(stored) => {
                    *stored = snapshot.clone();
                    Ok(PersistOutcome::updated())
                }
                None => Err(TransportError::api(404, format!("unknown document {}", id))),
            },
        }
    }
}
