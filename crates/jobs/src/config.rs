//! Job queue configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables for a [`JobQueue`](crate::JobQueue).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Jobs allowed in `STARTING`/`RUNNING` at the same time (at least 1)
    pub max_parallel_jobs: usize,
    /// How often each running job's remote status is polled
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 3,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl QueueConfig {
    /// Defaults overridden by `STAGEHAND_JOBS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        match read_u64(&lookup, "STAGEHAND_JOBS_MAX_PARALLEL") {
            Some(0) => tracing::warn!("STAGEHAND_JOBS_MAX_PARALLEL must be positive; ignored"),
            Some(n) => config.max_parallel_jobs = n as usize,
            None => {}
        }
        match read_u64(&lookup, "STAGEHAND_JOBS_POLL_INTERVAL_MS") {
            Some(0) => tracing::warn!("STAGEHAND_JOBS_POLL_INTERVAL_MS must be positive; ignored"),
            Some(ms) => config.poll_interval = Duration::from_millis(ms),
            None => {}
        }
        config
    }

    pub fn with_max_parallel_jobs(mut self, max: usize) -> Self {
        self.max_parallel_jobs = max.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
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
