//! Drives both orchestrators against in-memory backends and logs what they report.
//!
//! `RUST_LOG` controls verbosity; `STAGEHAND_SAVE_*` / `STAGEHAND_JOBS_*`
//! override the defaults.

mod editor;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tracing::info;

use stagehand_core::{ConnectivityMonitor, DocumentId};
use stagehand_jobs::{InMemoryJobBackend, JobQueue, JobRequest, NoAuth, QueueConfig};
use stagehand_save::{InMemoryPersistence, ItemSaveOutcome, SaveConfig, SaveOrchestrator};

use crate::editor::ScriptedEditor;

const EDIT_GAP: Duration = Duration::from_millis(300);
const BATCH_SIZE: usize = 5;
const BATCH_DEADLINE: Duration = Duration::from_secs(300);

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    stagehand_observability::init();

    let document_id = run_save_script(SaveConfig::from_env()).await?;
    run_job_batch(QueueConfig::from_env(), document_id).await?;

    info!("simulation finished");
    Ok(())
}

async fn run_save_script(config: SaveConfig) -> anyhow::Result<DocumentId> {
    let settle = config.debounce + Duration::from_millis(500);
    let editor = Arc::new(ScriptedEditor::new("Quarterly plan"));
    let store = Arc::new(InMemoryPersistence::new());
    let monitor = ConnectivityMonitor::default();

    let saver = SaveOrchestrator::new(config, editor.clone(), store.clone());
    let _connectivity = saver.watch_connectivity(monitor.subscribe());

    let mut updates = saver.on_status_change();
    let logger = tokio::spawn(async move {
        while let Some(details) = updates.recv().await {
            info!(
                status = %details.status,
                dirty = details.dirty,
                retry_count = details.retry_count,
                online = details.is_online,
                parked = details.parked,
                "save status"
            );
        }
    });

    info!("editing burst");
    for (i, cell) in ["A1", "A2", "A3", "B1", "B2"].iter().enumerate() {
        editor.edit(cell, i as u64 * 10);
        saver.trigger();
        tokio::time::sleep(EDIT_GAP).await;
    }
    tokio::time::sleep(settle).await;

    info!("connectivity blip");
    monitor.set_offline();
    editor.edit("C1", "offline edit");
    saver.trigger();
    tokio::time::sleep(settle).await;
    editor.edit("C2", "another offline edit");
    saver.trigger();
    tokio::time::sleep(settle).await;
    monitor.set_online();
    tokio::time::sleep(Duration::from_millis(100)).await;

    saver.track_item_save("cell:C3", ItemSaveOutcome::Saved, None);
    editor.edit("D1", "last edit before leaving");
    saver.trigger();
    let saved = saver.force_save().await;

    let details = serde_json::to_string(&saver.status_details())?;
    info!(saved, calls = store.calls().len(), %details, "save script done");

    let document_id = saver
        .document_id()
        .context("document was never created")?;
    saver.destroy();
    logger.await?;
    Ok(document_id)
}

async fn run_job_batch(config: QueueConfig, document_id: DocumentId) -> anyhow::Result<()> {
    let backend = Arc::new(InMemoryJobBackend::new().with_polls_to_finish(2));
    let queue = JobQueue::new(config, backend.clone(), Arc::new(NoAuth));
    let mut updates = queue.on_status_change();

    let all_items: Vec<String> = (1..=BATCH_SIZE).map(|i| format!("row-{i}")).collect();
    for item in &all_items {
        let request = JobRequest::new(
            json!({ "task": "enrich", "row": item }),
            document_id.clone(),
            "enrich-batch",
        )
        .with_items(vec![item.clone()], all_items.clone());
        queue.enqueue(request);
    }

    let drained = tokio::time::timeout(BATCH_DEADLINE, async {
        while let Some(event) = updates.recv().await {
            let Some(job) = &event.job else { continue };
            info!(
                ticket = %job.ticket,
                status = %job.status,
                running = event.queue.running_count,
                queued = event.queue.queued_count,
                "job status"
            );
            let idle = event.queue.running_count == 0 && event.queue.queued_count == 0;
            if idle && job.status.is_terminal() {
                break;
            }
        }
    })
    .await;

    if drained.is_err() {
        queue.cancel_all().await;
        anyhow::bail!("job batch did not drain within {:?}", BATCH_DEADLINE);
    }
    info!(submitted = backend.submissions().len(), "job batch drained");
    Ok(())
}
