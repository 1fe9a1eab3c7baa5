//! Job queue data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use stagehand_core::{DocumentId, RemoteJobId, TicketId};

/// Lifecycle of a job, locally and as reported by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in the overflow list
    Queued,
    /// Admitted; submission in progress
    Starting,
    /// Submitted and being polled
    Running,
    Completed,
    Failed,
    Stopped,
    Cancelled,
}

impl JobStatus {
    /// No further transition happens from a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped | JobStatus::Cancelled
        )
    }

    /// Whether a job in this status holds one of the bounded running slots.
    pub fn occupies_slot(&self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Starting => "STARTING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work the caller wants delegated to the remote compute service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Opaque body forwarded to the submission transport.
    pub payload: Value,
    pub doc_id: DocumentId,
    pub group_id: String,
    /// Items this job works on.
    pub item_ids: Vec<String>,
    /// Every item of the batch this job belongs to.
    pub all_item_ids: Vec<String>,
}

impl JobRequest {
    pub fn new(payload: Value, doc_id: DocumentId, group_id: impl Into<String>) -> Self {
        Self {
            payload,
            doc_id,
            group_id: group_id.into(),
            item_ids: Vec::new(),
            all_item_ids: Vec::new(),
        }
    }

    pub fn with_items(mut self, item_ids: Vec<String>, all_item_ids: Vec<String>) -> Self {
        self.item_ids = item_ids;
        self.all_item_ids = all_item_ids;
        self
    }
}

/// Caller-visible state of one job. Always handed out as a copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Local handle, known from the moment of enqueue.
    pub ticket: TicketId,
    /// Identifier assigned by the remote service once submission succeeds.
    pub job_id: Option<RemoteJobId>,
    pub status: JobStatus,
    pub doc_id: DocumentId,
    pub group_id: String,
    pub item_ids: Vec<String>,
    pub all_item_ids: Vec<String>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobRecord {
    pub(crate) fn queued(request: &JobRequest) -> Self {
        Self {
            ticket: TicketId::new(),
            job_id: None,
            status: JobStatus::Queued,
            doc_id: request.doc_id.clone(),
            group_id: request.group_id.clone(),
            item_ids: request.item_ids.clone(),
            all_item_ids: request.all_item_ids.clone(),
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Move to a terminal status.
    pub(crate) fn finish(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.completed_at = Some(Utc::now());
        if error.is_some() {
            self.error = error;
        }
    }
}

/// What the submission transport answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Missing when the service answered without assigning anything.
    pub job_id: Option<RemoteJobId>,
}

impl SubmitResponse {
    pub fn accepted(job_id: RemoteJobId) -> Self {
        Self {
            job_id: Some(job_id),
        }
    }
}

/// One answer of the job-status transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub status: JobStatus,
    /// Failure reason, copied onto the record when the job ends.
    pub error: Option<String>,
}

impl RemoteJobStatus {
    pub fn new(status: JobStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Read-only view of the queue for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued_count: usize,
    pub running_count: usize,
    pub max_parallel_jobs: usize,
    /// Oldest first.
    pub queued_jobs: Vec<JobRecord>,
    /// In admission order.
    pub running_jobs: Vec<JobRecord>,
}

/// Status event: the job that changed (if any) and the queue after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub job: Option<JobRecord>,
    pub queue: QueueStatus,
}
