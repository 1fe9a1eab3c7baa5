//! Bounded admission of long-running remote jobs.
//!
//! Requests wait in a FIFO overflow list until one of `max_parallel_jobs`
//! slots is free. An admitted job is `STARTING` while it is submitted and
//! `RUNNING` while its remote status is polled; both hold a slot. Reaching a
//! terminal status frees the slot exactly once and runs another admission
//! pass.
//!
//! Submissions are not retried. A job that fails to submit ends `FAILED`
//! and the caller decides whether to enqueue it again.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use stagehand_core::{RemoteJobId, TicketId};
use stagehand_events::{StatusBus, Subscription};

use crate::config::QueueConfig;
use crate::error::JobError;
use crate::transport::{AuthService, JobTransport};
use crate::types::{JobRecord, JobRequest, JobStatus, QueueEvent, QueueStatus};

/// Handle to a job queue. Cheap to clone; clones share the queue.
///
/// Must be used from inside a Tokio runtime: submissions and poll timers are
/// spawned tasks.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

struct Inner {
    config: QueueConfig,
    transport: Arc<dyn JobTransport>,
    auth: Arc<dyn AuthService>,
    state: Mutex<QueueState>,
    bus: StatusBus<QueueEvent>,
}

struct QueuedJob {
    record: JobRecord,
    request: JobRequest,
}

/// A job holding a slot.
struct RunningJob {
    record: JobRecord,
    /// Set iff the job is `RUNNING`.
    poll: Option<JoinHandle<()>>,
}

impl RunningJob {
    fn stop_polling(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.abort();
        }
    }
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<QueuedJob>,
    /// Keyed by admission order.
    running: BTreeMap<u64, RunningJob>,
    admitted: u64,
}

impl QueueState {
    fn slot_of(&self, ticket: TicketId) -> Option<u64> {
        self.running
            .iter()
            .find(|(_, job)| job.record.ticket == ticket)
            .map(|(slot, _)| *slot)
    }

    fn status(&self, max_parallel_jobs: usize) -> QueueStatus {
        QueueStatus {
            queued_count: self.queued.len(),
            running_count: self.running.len(),
            max_parallel_jobs,
            queued_jobs: self.queued.iter().map(|q| q.record.clone()).collect(),
            running_jobs: self.running.values().map(|r| r.record.clone()).collect(),
        }
    }
}

impl JobQueue {
    pub fn new(
        config: QueueConfig,
        transport: Arc<dyn JobTransport>,
        auth: Arc<dyn AuthService>,
    ) -> Self {
        let config = QueueConfig {
            max_parallel_jobs: config.max_parallel_jobs.max(1),
            ..config
        };
        let initial = QueueEvent {
            job: None,
            queue: QueueState::default().status(config.max_parallel_jobs),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                auth,
                state: Mutex::new(QueueState::default()),
                bus: StatusBus::with_initial(initial),
            }),
        }
    }

    /// Queue a job; it is admitted right away if a slot is free.
    ///
    /// Returns a copy of the record after that admission pass, so the
    /// status is either `QUEUED` or `STARTING`.
    pub fn enqueue(&self, request: JobRequest) -> JobRecord {
        let record = JobRecord::queued(&request);
        let ticket = record.ticket;
        info!(
            ticket = %ticket,
            doc_id = %request.doc_id,
            group_id = %request.group_id,
            items = request.item_ids.len(),
            "job enqueued"
        );

        let mut state = self.inner.lock_state();
        state.queued.push_back(QueuedJob {
            record: record.clone(),
            request,
        });
        self.inner.emit(&state, Some(record.clone()));
        self.inner.admit(&mut state);

        let admitted = state
            .slot_of(ticket)
            .and_then(|slot| state.running.get(&slot))
            .map(|job| job.record.clone());
        admitted.unwrap_or(record)
    }

    /// Subscribe to queue changes; the current queue status is delivered first.
    pub fn on_status_change(&self) -> Subscription<QueueEvent> {
        self.inner.bus.subscribe()
    }

    pub fn get_status(&self) -> QueueStatus {
        let state = self.inner.lock_state();
        state.status(self.inner.config.max_parallel_jobs)
    }

    /// Copy of a queued or running job. Finished jobs are only reported
    /// through status events.
    pub fn job(&self, ticket: TicketId) -> Option<JobRecord> {
        let state = self.inner.lock_state();
        if let Some(queued) = state.queued.iter().find(|q| q.record.ticket == ticket) {
            return Some(queued.record.clone());
        }
        let running = state
            .slot_of(ticket)
            .and_then(|slot| state.running.get(&slot))
            .map(|job| job.record.clone());
        running
    }

    /// Drop every queued and running job and ask the service to cancel the
    /// ones it knows about.
    ///
    /// Each dropped job is reported once as `CANCELLED`. Remote cancellation
    /// failures are logged, not retried. Calling this on an empty queue
    /// does nothing.
    pub async fn cancel_all(&self) {
        let remote: Vec<(TicketId, RemoteJobId)> = {
            let mut state = self.inner.lock_state();
            if state.queued.is_empty() && state.running.is_empty() {
                return;
            }
            let queued: Vec<QueuedJob> = state.queued.drain(..).collect();
            let running = std::mem::take(&mut state.running);

            let mut remote = Vec::new();
            for mut job in queued.into_iter().map(|q| q.record) {
                job.finish(JobStatus::Cancelled, None);
                self.inner.emit(&state, Some(job));
            }
            for mut job in running.into_values() {
                job.stop_polling();
                if let Some(job_id) = job.record.job_id.clone() {
                    remote.push((job.record.ticket, job_id));
                }
                job.record.finish(JobStatus::Cancelled, None);
                self.inner.emit(&state, Some(job.record));
            }
            info!(remote = remote.len(), "all jobs cancelled");
            remote
        };

        for (ticket, job_id) in remote {
            if let Err(e) = self.inner.transport.cancel_job(&job_id).await {
                warn!(ticket = %ticket, job_id = %job_id, error = %e, "remote cancellation failed");
            }
        }
    }

    /// Forget every queued and running job without contacting the service.
    pub fn reset(&self) {
        let mut state = self.inner.lock_state();
        for job in state.running.values_mut() {
            job.stop_polling();
        }
        let dropped = state.queued.len() + state.running.len();
        state.queued.clear();
        state.running.clear();
        debug!(dropped, "job queue reset");
        self.inner.emit(&state, None);
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, state: &QueueState, job: Option<JobRecord>) {
        debug_assert!(state.running.len() <= self.config.max_parallel_jobs);
        let event = QueueEvent {
            job,
            queue: state.status(self.config.max_parallel_jobs),
        };
        if let Err(e) = self.bus.publish(event) {
            debug!(error = %e, "queue event not published");
        }
    }

    /// Move queued jobs into free slots, oldest first.
    fn admit(self: &Arc<Self>, state: &mut QueueState) {
        while state.running.len() < self.config.max_parallel_jobs {
            let Some(QueuedJob {
                mut record,
                request,
            }) = state.queued.pop_front()
            else {
                break;
            };

            record.status = JobStatus::Starting;
            record.started_at = Some(Utc::now());
            let ticket = record.ticket;
            state.admitted += 1;
            state.running.insert(
                state.admitted,
                RunningJob {
                    record: record.clone(),
                    poll: None,
                },
            );
            info!(ticket = %ticket, running = state.running.len(), "job admitted");
            self.emit(state, Some(record));

            tokio::spawn(Arc::clone(self).submit(ticket, request));
        }
    }

    async fn submit(self: Arc<Self>, ticket: TicketId, request: JobRequest) {
        let result = self.try_submit(&request).await;

        let mut state = self.lock_state();
        let Some(slot) = state.slot_of(ticket) else {
            debug!(ticket = %ticket, "job dropped during submission; result discarded");
            return;
        };

        match result {
            Ok(job_id) => {
                let poller = tokio::spawn(poll(
                    Arc::downgrade(&self),
                    ticket,
                    job_id.clone(),
                    self.config.poll_interval,
                ));
                let Some(job) = state.running.get_mut(&slot) else {
                    return;
                };
                job.record.job_id = Some(job_id.clone());
                job.record.status = JobStatus::Running;
                job.poll = Some(poller);
                let record = job.record.clone();
                info!(ticket = %ticket, job_id = %job_id, "job running");
                self.emit(&state, Some(record));
            }
            Err(err) => {
                warn!(ticket = %ticket, error = %err, network = err.is_network(), "job submission failed");
                self.release(&mut state, slot, JobStatus::Failed, Some(err.to_string()));
            }
        }
    }

    async fn try_submit(&self, request: &JobRequest) -> Result<RemoteJobId, JobError> {
        self.auth.refresh_if_needed().await?;
        let response = self
            .transport
            .submit_job(&request.payload, &request.doc_id, &request.group_id)
            .await?;
        response.job_id.ok_or(JobError::MissingJobId)
    }

    /// Apply one poll answer. Returns `false` once the job no longer needs polling.
    fn on_poll(
        self: &Arc<Self>,
        ticket: TicketId,
        status: JobStatus,
        error: Option<String>,
    ) -> bool {
        let mut state = self.lock_state();
        let Some(slot) = state.slot_of(ticket) else {
            return false;
        };
        if !status.is_terminal() {
            debug!(ticket = %ticket, remote_status = %status, "job still running");
            return true;
        }
        self.release(&mut state, slot, status, error);
        false
    }

    /// Free a slot with a terminal status and refill it.
    fn release(
        self: &Arc<Self>,
        state: &mut QueueState,
        slot: u64,
        status: JobStatus,
        error: Option<String>,
    ) {
        let Some(mut job) = state.running.remove(&slot) else {
            return;
        };
        job.stop_polling();
        job.record.finish(status, error);
        info!(
            ticket = %job.record.ticket,
            job_id = ?job.record.job_id.as_ref().map(|id| id.as_str()),
            status = %status,
            error = ?job.record.error,
            "job finished"
        );
        self.emit(state, Some(job.record));
        self.admit(state);
    }
}

async fn poll(inner: Weak<Inner>, ticket: TicketId, job_id: RemoteJobId, period: Duration) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else { break };

        match inner.transport.job_status(&job_id).await {
            Ok(report) => {
                if !inner.on_poll(ticket, report.status, report.error) {
                    break;
                }
            }
            Err(e) => {
                warn!(ticket = %ticket, job_id = %job_id, error = %e, "job status poll failed");
            }
        }
    }
}
