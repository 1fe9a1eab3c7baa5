//! `stagehand-core` — shared building blocks for the background work orchestrators.
//!
//! This crate holds the pieces both orchestrators agree on: identifiers,
//! the transport error taxonomy, and connectivity state. It performs no I/O.

pub mod connectivity;
pub mod error;
pub mod id;

pub use connectivity::{ConnectivityMonitor, ConnectivityState};
pub use error::{CoreError, TransportError};
pub use id::{DocumentId, RemoteJobId, TicketId};
