//! Save orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use stagehand_core::DocumentId;

use crate::backoff::RetryPolicy;

/// Tunables for one [`SaveOrchestrator`](crate::SaveOrchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveConfig {
    /// Quiet period after the last trigger before a save starts
    pub debounce: Duration,
    /// Retry budget and backoff shape
    pub retry: RetryPolicy,
    /// How long an `item-saved` overlay stays visible
    pub item_saved_display: Duration,
    /// How long an `item-error` overlay stays visible
    pub item_error_display: Duration,
    /// Snapshot fields that must be present and non-blank
    pub required_fields: Vec<String>,
    /// Identifier of a document the service already knows (skips create)
    pub document_id: Option<DocumentId>,
    /// Connectivity assumed until the first environment signal arrives
    pub start_online: bool,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2_000),
            retry: RetryPolicy::default(),
            item_saved_display: Duration::from_secs(10),
            item_error_display: Duration::from_secs(2),
            required_fields: vec!["name".to_string()],
            document_id: None,
            start_online: true,
        }
    }
}

impl SaveConfig {
    /// Defaults overridden by `STAGEHAND_SAVE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(ms) = read_u64(&lookup, "STAGEHAND_SAVE_DEBOUNCE_MS") {
            config.debounce = Duration::from_millis(ms);
        }
        if let Some(n) = read_u64(&lookup, "STAGEHAND_SAVE_MAX_RETRIES") {
            config.retry.max_retries = n.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = read_u64(&lookup, "STAGEHAND_SAVE_BASE_DELAY_MS") {
            config.retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = read_u64(&lookup, "STAGEHAND_SAVE_MAX_DELAY_MS") {
            config.retry.max_delay = Duration::from_millis(ms);
        }
        config
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.retry.max_retries = max_retries;
        self
    }

    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_document_id(mut self, id: DocumentId) -> Self {
        self.document_id = Some(id);
        self
    }

    pub fn with_item_display(mut self, saved: Duration, error: Duration) -> Self {
        self.item_saved_display = saved;
        self.item_error_display = error;
        self
    }

    pub fn starting_offline(mut self) -> Self {
        self.start_online = false;
        self
    }
}

fn read_u64(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "ignoring invalid config value");
            None
        }
    }
}
