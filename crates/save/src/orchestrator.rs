//! Debounced, retried, connectivity-aware document saves.
//!
//! One [`SaveOrchestrator`] owns the pending changes of one document:
//!
//! - `trigger()` marks the document dirty and (re)starts the debounce timer
//! - when the timer fires, a fresh snapshot is taken and persisted
//! - failures are retried with exponential backoff until the budget runs out
//! - network failures while offline park the save until connectivity returns
//! - every state change is published as a [`StatusDetails`] copy
//!
//! At most one persistence call is in flight at any time. Edits that arrive
//! during a save keep the document dirty and are picked up by a follow-up
//! save instead of being interleaved into the running one.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stagehand_core::{ConnectivityState, DocumentId};
use stagehand_events::{StatusBus, Subscription};

use crate::config::SaveConfig;
use crate::error::SaveError;
use crate::transport::{PersistenceTransport, SnapshotProvider};
use crate::types::{ItemSaveOutcome, ItemSaveReport, PersistOp, SaveStatus, StatusDetails};

/// Handle to the save pipeline of a single document.
///
/// Cheap to clone; all clones drive the same state. Must be used from
/// inside a Tokio runtime since timers are spawned tasks.
#[derive(Clone)]
pub struct SaveOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: SaveConfig,
    snapshots: Arc<dyn SnapshotProvider>,
    transport: Arc<dyn PersistenceTransport>,
    task: Mutex<SaveTask>,
    /// Held for the whole duration of a save attempt.
    in_flight: tokio::sync::Mutex<()>,
    bus: StatusBus<StatusDetails>,
}

/// A scheduled wakeup. The sequence number lets a wakeup that lost a race
/// with `cancel` recognise itself as stale.
struct TimerHandle {
    seq: u64,
    join: JoinHandle<()>,
}

impl TimerHandle {
    fn cancel(self) {
        self.join.abort();
    }
}

struct ItemOverlay {
    report: ItemSaveReport,
    seq: u64,
    revert: JoinHandle<()>,
}

/// Mutable state; only ever touched with `Inner::task` locked.
///
/// Invariant: `pending_timer.is_some()` iff `status == Pending`.
struct SaveTask {
    dirty: bool,
    /// Bumped by every trigger; tells a finished save whether edits raced it.
    mutation_seq: u64,
    status: SaveStatus,
    pending_timer: Option<TimerHandle>,
    timer_seq: u64,
    retry_count: u32,
    last_attempt_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    is_online: bool,
    is_saving: bool,
    parked: bool,
    document_id: Option<DocumentId>,
    last_error: Option<String>,
    item: Option<ItemOverlay>,
    item_seq: u64,
    destroyed: bool,
}

impl SaveTask {
    fn new(config: &SaveConfig) -> Self {
        Self {
            dirty: false,
            mutation_seq: 0,
            status: SaveStatus::Idle,
            pending_timer: None,
            timer_seq: 0,
            retry_count: 0,
            last_attempt_at: None,
            last_success_at: None,
            is_online: config.start_online,
            is_saving: false,
            parked: false,
            document_id: config.document_id.clone(),
            last_error: None,
            item: None,
            item_seq: 0,
            destroyed: false,
        }
    }

    fn details(&self, max_retries: u32) -> StatusDetails {
        let item = self.item.as_ref().map(|overlay| overlay.report.clone());
        StatusDetails {
            status: item.as_ref().map(|r| r.status()).unwrap_or(self.status),
            document_status: self.status,
            dirty: self.dirty,
            retry_count: self.retry_count,
            max_retries,
            is_saving: self.is_saving,
            is_online: self.is_online,
            parked: self.parked,
            document_id: self.document_id.clone(),
            last_attempt_at: self.last_attempt_at,
            last_success_at: self.last_success_at,
            last_error: self.last_error.clone(),
            item,
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.pending_timer.take() {
            timer.cancel();
        }
    }
}

impl SaveOrchestrator {
    pub fn new(
        config: SaveConfig,
        snapshots: Arc<dyn SnapshotProvider>,
        transport: Arc<dyn PersistenceTransport>,
    ) -> Self {
        let task = SaveTask::new(&config);
        let bus = StatusBus::with_initial(task.details(config.retry.max_retries));
        Self {
            inner: Arc::new(Inner {
                config,
                snapshots,
                transport,
                task: Mutex::new(task),
                in_flight: tokio::sync::Mutex::new(()),
                bus,
            }),
        }
    }

    /// Record a mutation and restart the debounce window.
    ///
    /// A burst of calls closer together than the debounce interval produces
    /// exactly one save, `debounce` after the last call.
    pub fn trigger(&self) {
        let mut task = self.inner.lock_task();
        if task.destroyed {
            debug!("trigger ignored; orchestrator destroyed");
            return;
        }

        let previous = task.status;
        if previous == SaveStatus::Error && !task.parked {
            // A fresh edit after a failed cycle starts a new cycle.
            task.retry_count = 0;
        }
        task.dirty = true;
        task.mutation_seq += 1;
        // The new timer owns the next attempt; a parked cycle is over.
        task.parked = false;

        let delay = self.inner.config.debounce;
        self.inner.schedule(&mut task, delay);
        debug!(debounce_ms = delay.as_millis() as u64, "save debounced");

        if previous != SaveStatus::Pending {
            self.inner.emit(&task);
        }
    }

    /// Save now, skipping the debounce; `true` if the document ended up saved.
    ///
    /// Waits for an in-flight save to finish first, then runs its own attempt
    /// against the latest snapshot. Does not retry on failure (the normal
    /// retry schedule still applies afterwards).
    pub async fn force_save(&self) -> bool {
        let destroyed = self.inner.is_destroyed();
        if destroyed {
            return false;
        }
        let _guard = self.inner.in_flight.lock().await;
        self.inner.save_locked().await
    }

    /// Report the outcome of a fine-grained write that bypassed the pipeline.
    ///
    /// Shows `item-saved` / `item-error` for the configured display window,
    /// then reverts to the document-level status. Never touches `dirty` or
    /// the retry budget.
    pub fn track_item_save(
        &self,
        op: impl Into<String>,
        outcome: ItemSaveOutcome,
        details: Option<String>,
    ) {
        let mut task = self.inner.lock_task();
        if task.destroyed {
            return;
        }

        let report = ItemSaveReport {
            op: op.into(),
            outcome,
            details,
            reported_at: Utc::now(),
        };
        let window = match outcome {
            ItemSaveOutcome::Saved => self.inner.config.item_saved_display,
            ItemSaveOutcome::Failed => self.inner.config.item_error_display,
        };
        match outcome {
            ItemSaveOutcome::Saved => debug!(op = %report.op, "item saved"),
            ItemSaveOutcome::Failed => {
                warn!(op = %report.op, details = ?report.details, "item save failed")
            }
        }

        if let Some(previous) = task.item.take() {
            previous.revert.abort();
        }
        task.item_seq += 1;
        let seq = task.item_seq;
        let weak = Arc::downgrade(&self.inner);
        let revert = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(inner) = weak.upgrade() {
                inner.clear_item(seq);
            }
        });
        task.item = Some(ItemOverlay {
            report,
            seq,
            revert,
        });
        self.inner.emit(&task);
    }

    /// Subscribe to status changes; the current status is delivered first.
    pub fn on_status_change(&self) -> Subscription<StatusDetails> {
        self.inner.bus.subscribe()
    }

    pub fn status_details(&self) -> StatusDetails {
        let task = self.inner.lock_task();
        task.details(self.inner.config.retry.max_retries)
    }

    /// The status a UI should display right now.
    pub fn status(&self) -> SaveStatus {
        self.status_details().status
    }

    pub fn document_id(&self) -> Option<DocumentId> {
        self.inner.lock_task().document_id.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock_task().dirty
    }

    pub fn set_online(&self) {
        self.inner.apply_connectivity(ConnectivityState::Online);
    }

    pub fn set_offline(&self) {
        self.inner.apply_connectivity(ConnectivityState::Offline);
    }

    pub fn set_connectivity(&self, state: ConnectivityState) {
        self.inner.apply_connectivity(state);
    }

    /// Follow a connectivity feed until it closes or the orchestrator is destroyed.
    ///
    /// The current value of the feed is applied immediately.
    pub fn watch_connectivity(
        &self,
        mut feed: watch::Receiver<ConnectivityState>,
    ) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let state = *feed.borrow_and_update();
                {
                    let Some(inner) = weak.upgrade() else { break };
                    if inner.is_destroyed() {
                        break;
                    }
                    inner.apply_connectivity(state);
                }
                if feed.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Cancel every timer and close the status stream.
    ///
    /// A save already in flight runs to completion but its result is
    /// discarded. All later calls are no-ops.
    pub fn destroy(&self) {
        {
            let mut task = self.inner.lock_task();
            if task.destroyed {
                return;
            }
            task.destroyed = true;
            task.cancel_timer();
            if let Some(item) = task.item.take() {
                item.revert.abort();
            }
        }
        self.inner.bus.close();
        info!("save orchestrator destroyed");
    }
}

impl Inner {
    fn lock_task(&self) -> MutexGuard<'_, SaveTask> {
        // State stays consistent across a panicking subscriber; keep going.
        self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_destroyed(&self) -> bool {
        self.lock_task().destroyed
    }

    fn emit(&self, task: &SaveTask) {
        debug_assert!(
            task.pending_timer.is_none() || task.status == SaveStatus::Pending,
            "a debounce/retry timer only exists while pending"
        );
        if let Err(e) = self.bus.publish(task.details(self.config.retry.max_retries)) {
            debug!(error = %e, "status not published");
        }
    }

    /// Replace any outstanding timer with one firing after `delay`.
    fn schedule(self: &Arc<Self>, task: &mut SaveTask, delay: Duration) {
        task.cancel_timer();
        task.timer_seq += 1;
        let seq = task.timer_seq;
        let weak = Arc::downgrade(self);
        let join = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(seq).await;
            }
        });
        task.pending_timer = Some(TimerHandle { seq, join });
        task.status = SaveStatus::Pending;
    }

    async fn on_timer(self: Arc<Self>, seq: u64) {
        let guard = {
            let mut task = self.lock_task();
            match task.pending_timer.as_ref() {
                Some(timer) if timer.seq == seq => {}
                _ => return,
            }
            // This wakeup owns the handle now; dropping it does not abort us.
            task.pending_timer = None;
            match self.in_flight.try_lock() {
                Ok(guard) => guard,
                Err(_) => {
                    debug!("save in flight; re-arming debounce");
                    let delay = self.config.debounce;
                    self.schedule(&mut task, delay);
                    return;
                }
            }
        };
        self.save_locked().await;
        drop(guard);
    }

    /// The save procedure. Callers hold `in_flight`.
    async fn save_locked(self: &Arc<Self>) -> bool {
        let (seq, document_id) = {
            let mut task = self.lock_task();
            if task.destroyed {
                return false;
            }
            task.cancel_timer();

            if !task.dirty {
                task.status = SaveStatus::Saved;
                task.parked = false;
                self.emit(&task);
                return true;
            }
            if !task.is_online {
                Self::park(&mut task, "offline; save deferred until connectivity returns");
                self.emit(&task);
                return false;
            }

            task.parked = false;
            task.is_saving = true;
            task.status = SaveStatus::Saving;
            task.last_attempt_at = Some(Utc::now());
            self.emit(&task);
            (task.mutation_seq, task.document_id.clone())
        };

        let result = self.attempt(document_id).await;

        let mut task = self.lock_task();
        task.is_saving = false;
        if task.destroyed {
            debug!("discarding save result; orchestrator destroyed");
            return false;
        }
        match result {
            Ok(assigned) => {
                self.settle_success(&mut task, seq, assigned);
                true
            }
            Err(err) => {
                self.settle_failure(&mut task, seq, err);
                false
            }
        }
    }

    async fn attempt(&self, document_id: Option<DocumentId>) -> Result<Option<DocumentId>, SaveError> {
        let snapshot = self
            .snapshots
            .document_snapshot()
            .await
            .map_err(|e| SaveError::Snapshot(format!("{:#}", e)))?;
        snapshot.validate(&self.config.required_fields)?;

        let op = match document_id {
            Some(id) => PersistOp::Update(id),
            None => PersistOp::Create,
        };
        debug!(op = op.name(), "persisting snapshot");
        let outcome = self.transport.persist(&op, &snapshot).await?;

        match op {
            PersistOp::Create => outcome
                .assigned_id
                .map(Some)
                .ok_or(SaveError::MissingAssignedId),
            PersistOp::Update(_) => Ok(None),
        }
    }

    fn settle_success(self: &Arc<Self>, task: &mut SaveTask, seq: u64, assigned: Option<DocumentId>) {
        if let Some(id) = assigned {
            info!(document_id = %id, "document created");
            task.document_id = Some(id);
        }
        task.retry_count = 0;
        task.last_success_at = Some(Utc::now());
        task.last_error = None;

        if task.mutation_seq == seq {
            task.dirty = false;
            task.status = SaveStatus::Saved;
        } else if task.pending_timer.is_none() {
            debug!("edits arrived during save; scheduling follow-up");
            let delay = self.config.debounce;
            self.schedule(task, delay);
        }

        info!(
            document_id = ?task.document_id.as_ref().map(|id| id.as_str()),
            dirty = task.dirty,
            "document saved"
        );
        self.emit(task);
    }

    fn settle_failure(self: &Arc<Self>, task: &mut SaveTask, seq: u64, err: SaveError) {
        task.last_error = Some(err.to_string());
        let edited_since = task.mutation_seq != seq;

        if !err.is_retriable() {
            if edited_since {
                self.restart_cycle(task, &err);
            } else {
                task.cancel_timer();
                task.status = SaveStatus::Error;
                error!(error = %err, "save failed; not retriable");
            }
        } else if err.is_network() && !task.is_online {
            Self::park(task, &err.to_string());
        } else {
            task.retry_count += 1;
            if self.config.retry.should_retry(task.retry_count) {
                let delay = self.config.retry.delay_for_attempt(task.retry_count);
                warn!(
                    retry_count = task.retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "save failed; retrying"
                );
                self.schedule(task, delay);
            } else if edited_since {
                self.restart_cycle(task, &err);
            } else {
                task.cancel_timer();
                task.status = SaveStatus::Error;
                error!(
                    retry_count = task.retry_count,
                    error = %err,
                    "save retries exhausted; local edits kept"
                );
            }
        }
        self.emit(task);
    }

    /// The failed attempt carried a stale snapshot; edits made while it was in
    /// flight get their own cycle with a full budget.
    fn restart_cycle(self: &Arc<Self>, task: &mut SaveTask, err: &SaveError) {
        warn!(
            retry_count = task.retry_count,
            error = %err,
            "save failed; newer edits start a fresh cycle"
        );
        task.retry_count = 0;
        if task.pending_timer.is_none() {
            let delay = self.config.debounce;
            self.schedule(task, delay);
        }
    }

    /// Stop retrying until connectivity returns. Does not count against the budget.
    fn park(task: &mut SaveTask, reason: &str) {
        task.cancel_timer();
        task.parked = true;
        task.status = SaveStatus::Error;
        task.last_error = Some(reason.to_string());
        warn!(reason, "save parked until connectivity returns");
    }

    fn apply_connectivity(self: &Arc<Self>, state: ConnectivityState) {
        let mut task = self.lock_task();
        if task.destroyed || task.is_online == state.is_online() {
            return;
        }
        task.is_online = state.is_online();

        if !task.is_online {
            info!("connectivity lost; network failures will park");
            self.emit(&task);
            return;
        }

        let flush = task.parked || (task.dirty && task.pending_timer.is_none() && !task.is_saving);
        if flush {
            info!(parked = task.parked, "connectivity restored; flushing pending save");
            task.parked = false;
            // A zero-delay timer: one save, however many attempts were missed.
            self.schedule(&mut task, Duration::ZERO);
        } else {
            info!("connectivity restored");
        }
        self.emit(&task);
    }

    fn clear_item(&self, seq: u64) {
        let mut task = self.lock_task();
        if task.destroyed {
            return;
        }
        if task.item.as_ref().is_some_and(|overlay| overlay.seq == seq) {
            task.item = None;
            self.emit(&task);
        }
    }
}
