use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{Value, json};
use tokio::sync::Semaphore;

use stagehand_core::{DocumentId, RemoteJobId, TicketId, TransportError};
use stagehand_jobs::{
    AuthError, AuthService, InMemoryJobBackend, JobQueue, JobRecord, JobRequest, JobStatus,
    JobTransport, NoAuth, QueueConfig, QueueEvent, RemoteJobStatus, SubmitResponse,
};

/// The in-memory backend plus knobs the scenarios need: held submissions
/// and failing status polls.
struct TestBackend {
    backend: InMemoryJobBackend,
    submit_gate: Option<Semaphore>,
    failing_polls: AtomicUsize,
    cancel_fails: AtomicBool,
}

impl TestBackend {
    fn new() -> Arc<Self> {
        Self::wrapping(InMemoryJobBackend::new())
    }

    fn wrapping(backend: InMemoryJobBackend) -> Arc<Self> {
        Arc::new(Self {
            backend,
            submit_gate: None,
            failing_polls: AtomicUsize::new(0),
            cancel_fails: AtomicBool::new(false),
        })
    }

    fn gated() -> Arc<Self> {
        Arc::new(Self {
            backend: InMemoryJobBackend::new(),
            submit_gate: Some(Semaphore::new(0)),
            failing_polls: AtomicUsize::new(0),
            cancel_fails: AtomicBool::new(false),
        })
    }

    fn release_submission(&self) {
        if let Some(gate) = &self.submit_gate {
            gate.add_permits(1);
        }
    }

    fn complete(&self, job: &str) {
        self.backend
            .finish(&job_id(job), RemoteJobStatus::new(JobStatus::Completed));
    }
}

#[async_trait]
impl JobTransport for TestBackend {
    async fn submit_job(
        &self,
        payload: &Value,
        doc_id: &DocumentId,
        group_id: &str,
    ) -> Result<SubmitResponse, TransportError> {
        if let Some(gate) = &self.submit_gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        self.backend.submit_job(payload, doc_id, group_id).await
    }

    async fn job_status(&self, job_id: &RemoteJobId) -> Result<RemoteJobStatus, TransportError> {
        let failing = self
            .failing_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::timeout("status endpoint timed out"));
        }
        self.backend.job_status(job_id).await
    }

    async fn cancel_job(&self, job_id: &RemoteJobId) -> Result<(), TransportError> {
        if self.cancel_fails.load(Ordering::SeqCst) {
            return Err(TransportError::api(502, "bad gateway"));
        }
        self.backend.cancel_job(job_id).await
    }
}

#[derive(Default)]
struct CountingAuth {
    refreshes: AtomicUsize,
    failure: Mutex<Option<AuthError>>,
}

#[async_trait]
impl AuthService for CountingAuth {
    async fn refresh_if_needed(&self) -> Result<(), AuthError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

const POLL: Duration = Duration::from_secs(5);

fn queue(max_parallel: usize, backend: Arc<TestBackend>) -> JobQueue {
    stagehand_observability::init_for_tests();
    let config = QueueConfig::default()
        .with_max_parallel_jobs(max_parallel)
        .with_poll_interval(POLL);
    JobQueue::new(config, backend, Arc::new(NoAuth))
}

fn request(group: &str) -> JobRequest {
    JobRequest::new(
        json!({"task": "summarize", "group": group}),
        DocumentId::parse("doc-1").unwrap(),
        group,
    )
    .with_items(vec![format!("{group}-item")], vec!["a-item".into(), "b-item".into()])
}

fn job_id(s: &str) -> RemoteJobId {
    RemoteJobId::parse(s).unwrap()
}

/// Every status a job went through, in event order.
fn history(events: &[QueueEvent], ticket: TicketId) -> Vec<JobStatus> {
    events
        .iter()
        .filter_map(|e| e.job.as_ref())
        .filter(|job| job.ticket == ticket)
        .map(|job| job.status)
        .collect()
}

fn last_record(events: &[QueueEvent], ticket: TicketId) -> JobRecord {
    events
        .iter()
        .filter_map(|e| e.job.clone())
        .filter(|job| job.ticket == ticket)
        .last()
        .expect("no event for ticket")
}

async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

async fn advance(duration: Duration) {
    tokio::time::sleep(duration).await;
    settle().await;
}

async fn next_poll() {
    advance(POLL + Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn freed_slot_admits_the_queued_job() {
    let backend = TestBackend::new();
    let queue = queue(2, backend.clone());
    let mut events = queue.on_status_change();

    let first = queue.enqueue(request("a"));
    let second = queue.enqueue(request("b"));
    let third = queue.enqueue(request("c"));
    assert_eq!(first.status, JobStatus::Starting);
    assert_eq!(third.status, JobStatus::Queued);

    settle().await;
    assert_eq!(queue.job(first.ticket).unwrap().status, JobStatus::Running);
    assert_eq!(queue.job(second.ticket).unwrap().status, JobStatus::Running);
    assert_eq!(queue.job(third.ticket).unwrap().status, JobStatus::Queued);

    backend.complete("job-1");
    next_poll().await;

    let events = events.drain();
    assert_eq!(
        history(&events, first.ticket),
        vec![
            JobStatus::Queued,
            JobStatus::Starting,
            JobStatus::Running,
            JobStatus::Completed
        ]
    );
    assert_eq!(
        history(&events, third.ticket),
        vec![JobStatus::Queued, JobStatus::Starting, JobStatus::Running]
    );

    let status = queue.get_status();
    assert_eq!(status.running_count, 2);
    assert_eq!(status.queued_count, 0);
    let running: Vec<TicketId> = status.running_jobs.iter().map(|j| j.ticket).collect();
    assert_eq!(running, vec![second.ticket, third.ticket]);
    assert!(queue.job(first.ticket).is_none());
}

#[tokio::test(start_paused = true)]
async fn overflow_is_served_in_fifo_order() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());

    let _a = queue.enqueue(request("a"));
    let b = queue.enqueue(request("b"));
    let c = queue.enqueue(request("c"));
    settle().await;

    let queued: Vec<TicketId> = queue
        .get_status()
        .queued_jobs
        .iter()
        .map(|j| j.ticket)
        .collect();
    assert_eq!(queued, vec![b.ticket, c.ticket]);

    backend.complete("job-1");
    next_poll().await;
    backend.complete("job-2");
    next_poll().await;

    let groups: Vec<String> = backend
        .backend
        .submissions()
        .into_iter()
        .map(|s| s.group_id)
        .collect();
    assert_eq!(groups, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn missing_job_id_fails_without_holding_the_slot() {
    let backend = TestBackend::new();
    backend.backend.omit_next_job_id();
    let queue = queue(1, backend.clone());
    let mut events = queue.on_status_change();

    let broken = queue.enqueue(request("a"));
    let next = queue.enqueue(request("b"));
    settle().await;

    let events = events.drain();
    let failed = last_record(&events, broken.ticket);
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.job_id.is_none());
    assert!(failed.error.unwrap().contains("no job id"));
    assert!(failed.completed_at.is_some());

    assert_eq!(queue.job(next.ticket).unwrap().status, JobStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn submission_error_does_not_stall_the_queue() {
    let backend = TestBackend::new();
    backend
        .backend
        .fail_next_submit(TransportError::network("connection reset"));
    let queue = queue(1, backend.clone());
    let mut events = queue.on_status_change();

    let doomed = queue.enqueue(request("a"));
    let next = queue.enqueue(request("b"));
    settle().await;

    let events = events.drain();
    assert_eq!(
        history(&events, doomed.ticket),
        vec![JobStatus::Queued, JobStatus::Starting, JobStatus::Failed]
    );
    assert!(
        last_record(&events, doomed.ticket)
            .error
            .unwrap()
            .contains("connection reset")
    );
    assert_eq!(queue.job(next.ticket).unwrap().status, JobStatus::Running);

    // Not retried automatically.
    advance(POLL * 4).await;
    assert_eq!(backend.backend.submissions().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn auth_is_refreshed_before_every_submission() {
    stagehand_observability::init_for_tests();
    let backend = TestBackend::new();
    let auth = Arc::new(CountingAuth::default());
    *auth.failure.lock().unwrap() = Some(AuthError::Expired("refresh token revoked".into()));
    let queue = JobQueue::new(
        QueueConfig::default().with_max_parallel_jobs(2),
        backend.clone(),
        auth.clone(),
    );
    let mut events = queue.on_status_change();

    let rejected = queue.enqueue(request("a"));
    let accepted = queue.enqueue(request("b"));
    settle().await;

    assert_eq!(auth.refreshes.load(Ordering::SeqCst), 2);
    let failed = last_record(&events.drain(), rejected.ticket);
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("session expired"));
    assert_eq!(backend.backend.submissions().len(), 1);
    assert_eq!(queue.job(accepted.ticket).unwrap().status, JobStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn remote_failure_reason_is_kept() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());
    let mut events = queue.on_status_change();

    let job = queue.enqueue(request("a"));
    settle().await;
    backend
        .backend
        .finish(&job_id("job-1"), RemoteJobStatus::failed("worker ran out of memory"));
    next_poll().await;

    let record = last_record(&events.drain(), job.ticket);
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.job_id, Some(job_id("job-1")));
    assert_eq!(record.error.as_deref(), Some("worker ran out of memory"));
    assert_eq!(queue.get_status().running_count, 0);
}

#[tokio::test(start_paused = true)]
async fn self_finishing_jobs_can_end_failed() {
    let backend = TestBackend::wrapping(
        InMemoryJobBackend::new()
            .with_polls_to_finish(2)
            .with_outcome(RemoteJobStatus::failed("quota exceeded")),
    );
    let queue = queue(1, backend.clone());
    let mut events = queue.on_status_change();

    let first = queue.enqueue(request("a"));
    let second = queue.enqueue(request("b"));
    settle().await;

    next_poll().await;
    assert_eq!(queue.job(first.ticket).unwrap().status, JobStatus::Running);
    next_poll().await;

    let record = last_record(&events.drain(), first.ticket);
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.as_deref(), Some("quota exceeded"));
    assert_eq!(backend.backend.polls(&job_id("job-1")), 2);

    assert!(queue.job(first.ticket).is_none());
    assert_eq!(queue.job(second.ticket).unwrap().status, JobStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn stopped_is_terminal_too() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());

    let job = queue.enqueue(request("a"));
    let next = queue.enqueue(request("b"));
    settle().await;
    backend
        .backend
        .finish(&job_id("job-1"), RemoteJobStatus::new(JobStatus::Stopped));
    next_poll().await;

    assert!(queue.job(job.ticket).is_none());
    assert_eq!(queue.job(next.ticket).unwrap().status, JobStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn poll_errors_keep_polling() {
    let backend = TestBackend::new();
    backend.failing_polls.store(2, Ordering::SeqCst);
    let queue = queue(1, backend.clone());

    let job = queue.enqueue(request("a"));
    settle().await;
    backend.complete("job-1");

    next_poll().await;
    next_poll().await;
    assert_eq!(queue.job(job.ticket).unwrap().status, JobStatus::Running);

    next_poll().await;
    assert!(queue.job(job.ticket).is_none());
    assert_eq!(queue.get_status().running_count, 0);
}

#[tokio::test(start_paused = true)]
async fn running_jobs_are_polled_on_the_interval() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());

    queue.enqueue(request("a"));
    settle().await;
    advance(POLL * 3 + Duration::from_millis(1)).await;

    assert_eq!(backend.backend.polls(&job_id("job-1")), 3);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_cancels_remotely_and_is_idempotent() {
    let backend = TestBackend::new();
    let queue = queue(2, backend.clone());

    let tickets: Vec<TicketId> = ["a", "b", "c"]
        .into_iter()
        .map(|g| queue.enqueue(request(g)).ticket)
        .collect();
    settle().await;

    let mut events = queue.on_status_change();
    events.drain();
    queue.cancel_all().await;

    let events = events.drain();
    for ticket in &tickets {
        assert_eq!(history(&events, *ticket), vec![JobStatus::Cancelled]);
    }
    assert_eq!(backend.backend.cancellations(), vec![job_id("job-1"), job_id("job-2")]);
    let status = queue.get_status();
    assert_eq!((status.queued_count, status.running_count), (0, 0));

    let polls = backend.backend.polls(&job_id("job-1"));
    advance(POLL * 3).await;
    assert_eq!(backend.backend.polls(&job_id("job-1")), polls);

    let mut later = queue.on_status_change();
    later.drain();
    queue.cancel_all().await;
    assert!(later.drain().is_empty());
    assert_eq!(backend.backend.cancellations().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_remote_cancellation_is_only_logged() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());

    queue.enqueue(request("a"));
    settle().await;
    backend.cancel_fails.store(true, Ordering::SeqCst);

    queue.cancel_all().await;
    assert_eq!(queue.get_status().running_count, 0);
    assert!(backend.backend.cancellations().is_empty());

    let polls = backend.backend.polls(&job_id("job-1"));
    next_poll().await;
    assert_eq!(backend.backend.polls(&job_id("job-1")), polls);
}

#[tokio::test(start_paused = true)]
async fn job_cancelled_mid_submission_is_discarded() {
    let backend = TestBackend::gated();
    let queue = queue(1, backend.clone());
    let mut events = queue.on_status_change();

    let job = queue.enqueue(request("a"));
    settle().await;
    queue.cancel_all().await;

    backend.release_submission();
    settle().await;

    let events = events.drain();
    assert_eq!(
        history(&events, job.ticket),
        vec![JobStatus::Queued, JobStatus::Starting, JobStatus::Cancelled]
    );
    assert_eq!(queue.get_status().running_count, 0);
    assert!(backend.backend.cancellations().is_empty());

    // The freed slot is usable straight away.
    let next = queue.enqueue(request("b"));
    assert_eq!(next.status, JobStatus::Starting);
}

#[tokio::test(start_paused = true)]
async fn reset_forgets_everything_without_remote_calls() {
    let backend = TestBackend::new();
    let queue = queue(1, backend.clone());

    queue.enqueue(request("a"));
    queue.enqueue(request("b"));
    settle().await;

    queue.reset();
    advance(POLL * 2).await;

    let status = queue.get_status();
    assert_eq!((status.queued_count, status.running_count), (0, 0));
    assert!(backend.backend.cancellations().is_empty());
    assert_eq!(backend.backend.polls(&job_id("job-1")), 0);
}

#[tokio::test(start_paused = true)]
async fn subscribers_start_with_the_current_queue() {
    let backend = TestBackend::new();
    let queue = queue(1, backend);

    queue.enqueue(request("a"));
    queue.enqueue(request("b"));

    let mut events = queue.on_status_change();
    let first = events.try_recv().unwrap();
    assert_eq!(first.queue.running_count, 1);
    assert_eq!(first.queue.queued_count, 1);
    assert_eq!(first.queue.max_parallel_jobs, 1);
}

#[tokio::test(start_paused = true)]
async fn status_exposes_records_only() {
    let backend = TestBackend::new();
    let queue = queue(1, backend);

    let running = queue.enqueue(request("a"));
    let waiting = queue.enqueue(request("b"));
    settle().await;

    let status = queue.get_status();
    assert_eq!(status.running_jobs[0].ticket, running.ticket);
    assert_eq!(status.running_jobs[0].job_id, Some(job_id("job-1")));
    assert!(status.running_jobs[0].started_at.is_some());
    assert_eq!(status.queued_jobs[0].ticket, waiting.ticket);
    assert_eq!(status.queued_jobs[0].item_ids, vec!["b-item".to_string()]);
    assert_eq!(status.queued_jobs[0].all_item_ids.len(), 2);
}

#[derive(Debug, Clone)]
enum Op {
    Enqueue,
    Complete(usize),
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Enqueue),
        2 => (0usize..16).prop_map(Op::Complete),
        2 => (1u64..8_000).prop_map(Op::Wait),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn running_jobs_never_exceed_the_bound(
        max_parallel in 1usize..4,
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let backend = TestBackend::new();
            let queue = queue(max_parallel, backend.clone());
            let mut events = queue.on_status_change();
            let mut enqueued = Vec::new();

            for op in ops {
                match op {
                    Op::Enqueue => enqueued.push(queue.enqueue(request("p")).ticket),
                    Op::Complete(i) => {
                        let submitted = backend.backend.submissions().len();
                        if submitted > 0 {
                            backend.complete(&format!("job-{}", i % submitted + 1));
                        }
                    }
                    Op::Wait(ms) => advance(Duration::from_millis(ms)).await,
                }
                settle().await;
                assert!(queue.get_status().running_count <= max_parallel);
            }

            let events = events.drain();
            assert!(events.iter().all(|e| e.queue.running_count <= max_parallel));

            let admitted: Vec<TicketId> = events
                .iter()
                .filter_map(|e| e.job.as_ref())
                .filter(|job| job.status == JobStatus::Starting)
                .map(|job| job.ticket)
                .collect();
            assert_eq!(admitted[..], enqueued[..admitted.len()]);
        });
    }
}
