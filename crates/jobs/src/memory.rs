//! Simulated remote job service for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use stagehand_core::{DocumentId, RemoteJobId, TransportError};

use crate::transport::JobTransport;
use crate::types::{JobStatus, RemoteJobStatus, SubmitResponse};

/// A compute service living in process memory.
///
/// - Submit assigns `job-1`, `job-2`, ...
/// - A job reports `RUNNING` until it is [`finish`](Self::finish)ed, or until
///   it has been polled `polls_to_finish` times when that is configured
/// - Cancelled jobs report `CANCELLED` from then on
#[derive(Debug, Default)]
pub struct InMemoryJobBackend {
    state: Mutex<BackendState>,
}

#[derive(Debug, Default)]
struct BackendState {
    next_id: u64,
    jobs: HashMap<RemoteJobId, SimulatedJob>,
    polls_to_finish: Option<u32>,
    outcome: Option<RemoteJobStatus>,
    injected: VecDeque<Injected>,
    submissions: Vec<Submission>,
    cancellations: Vec<RemoteJobId>,
}

#[derive(Debug)]
struct SimulatedJob {
    polls: u32,
    result: Option<RemoteJobStatus>,
}

#[derive(Debug)]
enum Injected {
    Fail(TransportError),
    NoJobId,
}

/// One request seen by [`InMemoryJobBackend::submit_job`].
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub payload: Value,
    pub doc_id: DocumentId,
    pub group_id: String,
}

impl InMemoryJobBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs end on their own after `polls` status requests, as `COMPLETED`.
    pub fn with_polls_to_finish(self, polls: u32) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.polls_to_finish = Some(polls.max(1));
        }
        self
    }

    /// Status self-finishing jobs end with (default `COMPLETED`).
    pub fn with_outcome(self, outcome: RemoteJobStatus) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.outcome = Some(outcome);
        }
        self
    }

    /// Make the next submission fail with `error`.
    pub fn fail_next_submit(&self, error: TransportError) {
        if let Ok(mut state) = self.state.lock() {
            state.injected.push_back(Injected::Fail(error));
        }
    }

    /// Make the next submission succeed without returning a job id.
    pub fn omit_next_job_id(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.injected.push_back(Injected::NoJobId);
        }
    }

    /// Force the status the job reports from now on.
    pub fn finish(&self, job_id: &RemoteJobId, result: RemoteJobStatus) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(job) = state.jobs.get_mut(job_id) {
                job.result = Some(result);
            }
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state
            .lock()
            .map(|s| s.submissions.clone())
            .unwrap_or_default()
    }

    pub fn cancellations(&self) -> Vec<RemoteJobId> {
        self.state
            .lock()
            .map(|s| s.cancellations.clone())
            .unwrap_or_default()
    }

    /// Status requests received for `job_id`.
    pub fn polls(&self, job_id: &RemoteJobId) -> u32 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.jobs.get(job_id).map(|j| j.polls))
            .unwrap_or(0)
    }
}

#[async_trait]
impl JobTransport for InMemoryJobBackend {
    async fn submit_job(
        &self,
        payload: &Value,
        doc_id: &DocumentId,
        group_id: &str,
    ) -> Result<SubmitResponse, TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TransportError::network("in-memory backend poisoned"))?;
        state.submissions.push(Submission {
            payload: payload.clone(),
            doc_id: doc_id.clone(),
            group_id: group_id.to_string(),
        });

        match state.injected.pop_front() {
            Some(Injected::Fail(error)) => return Err(error),
            Some(Injected::NoJobId) => return Ok(SubmitResponse::default()),
            None => {}
        }

        state.next_id += 1;
        let job_id = RemoteJobId::parse(format!("job-{}", state.next_id))
            .map_err(|e| TransportError::parse(e.to_string()))?;
        state.jobs.insert(
            job_id.clone(),
            SimulatedJob {
                polls: 0,
                result: None,
            },
        );
        Ok(SubmitResponse::accepted(job_id))
    }

    async fn job_status(&self, job_id: &RemoteJobId) -> Result<RemoteJobStatus, TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TransportError::network("in-memory backend poisoned"))?;
        let polls_to_finish = state.polls_to_finish;
        let outcome = state
            .outcome
            .clone()
            .unwrap_or_else(|| RemoteJobStatus::new(JobStatus::Completed));

        let job = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| TransportError::api(404, format!("unknown job {}", job_id)))?;
        job.polls += 1;

        if let Some(result) = &job.result {
            return Ok(result.clone());
        }
        if polls_to_finish.is_some_and(|n| job.polls >= n) {
            job.result = Some(outcome.clone());
            return Ok(outcome);
        }
        Ok(RemoteJobStatus::new(JobStatus::Running))
    }

    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), TransportError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TransportError::network("in-memory backend poisoned"))?;
        state.cancellations.push(job_id.clone());
        match state.jobs.get_mut(job_id) {
            Some(job) => {
                if job.result.is_none() {
                    job.result = Some(RemoteJobStatus::new(JobStatus::Cancelled));
                }
                Ok(())
            }
            None => Err(TransportError::api(404, format!("unknown job {}", job_id))),
        }
    }
}
