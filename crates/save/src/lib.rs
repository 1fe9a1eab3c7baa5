//! `stagehand-save` — the save orchestrator.
//!
//! Turns a stream of bursty edit signals into debounced, single-flight,
//! retried persistence calls for one document, and reports progress as a
//! stream of status copies.
//!
//! ## Components
//!
//! - `SaveOrchestrator`: the debounce / retry / park state machine
//! - `RetryPolicy`: retry budget and capped exponential backoff with jitter
//! - `SnapshotProvider`, `PersistenceTransport`: injected collaborators
//! - `InMemoryPersistence`: in-process transport for tests/dev

pub mod backoff;
pub mod config;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod transport;
pub mod types;

pub use backoff::RetryPolicy;
pub use config::SaveConfig;
pub use error::SaveError;
pub use memory::InMemoryPersistence;
pub use orchestrator::SaveOrchestrator;
pub use transport::{PersistenceTransport, SnapshotProvider};
pub use types::{
    DocumentSnapshot, ItemSaveOutcome, ItemSaveReport, PersistOp, PersistOutcome, SaveStatus,
    StatusDetails,
};
