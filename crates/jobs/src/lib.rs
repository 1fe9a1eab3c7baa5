//! Job admission queue.
//!
//! Admits long-running jobs into a bounded pool of concurrently running
//! remote jobs, keeps the overflow in FIFO order, polls every running job
//! until it reaches a terminal status, and publishes each change.
//!
//! Components:
//! - [`JobQueue`]: the queue itself
//! - [`JobTransport`] / [`AuthService`]: injected remote collaborators
//! - [`InMemoryJobBackend`]: simulated compute service for tests and the simulator
//! - [`QueueConfig`]: slot count and poll interval

pub mod config;
pub mod error;
pub mod memory;
pub mod queue;
pub mod transport;
pub mod types;

pub use config::QueueConfig;
pub use error::{AuthError, JobError};
pub use memory::{InMemoryJobBackend, Submission};
pub use queue::JobQueue;
pub use transport::{AuthService, JobTransport, NoAuth};
pub use types::{
    JobRecord, JobRequest, JobStatus, QueueEvent, QueueStatus, RemoteJobStatus, SubmitResponse,
};
