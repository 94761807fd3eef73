use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

pub const DEFAULT_QUEUE_SIZE: usize = 10_000;
pub const QUEUE_SIZE_MIN: usize = 1_000;
pub const QUEUE_SIZE_MAX: usize = 100_000_000;

pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 10_000;
pub const BATCH_INTERVAL_MIN_MS: u64 = 1_000;
pub const BATCH_INTERVAL_MAX_MS: u64 = 3_600_000;

pub const DEFAULT_STATUS_REFRESH_MS: u64 = 100;

const QUEUE_DB_NAME: &str = "queue.db";

/// Queue configuration, mapped from the agent settings
/// `agent.path.data`, `agent.queue_size`, `events.batch_interval` and
/// `agent.queue_status_refresh_timer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory holding the queue database.
    pub data_path: PathBuf,
    /// Total item capacity across all message kinds.
    pub queue_size: usize,
    /// Egress batching hint, milliseconds.
    pub batch_interval_ms: u64,
    /// Poll period for blocking and cooperative waits, milliseconds.
    pub status_refresh_timer_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("."),
            queue_size: DEFAULT_QUEUE_SIZE,
            batch_interval_ms: DEFAULT_BATCH_INTERVAL_MS,
            status_refresh_timer_ms: DEFAULT_STATUS_REFRESH_MS,
        }
    }
}

impl QueueConfig {
    pub fn with_data_path(path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: path.into(),
            ..Self::default()
        }
    }

    /// Replaces out-of-range settings with their defaults.
    pub fn sanitized(mut self) -> Self {
        if !(QUEUE_SIZE_MIN..=QUEUE_SIZE_MAX).contains(&self.queue_size) {
            warn!(
                "queue_size must be between {QUEUE_SIZE_MIN} and {QUEUE_SIZE_MAX}; \
                 using default {DEFAULT_QUEUE_SIZE}"
            );
            self.queue_size = DEFAULT_QUEUE_SIZE;
        }
        if !(BATCH_INTERVAL_MIN_MS..=BATCH_INTERVAL_MAX_MS).contains(&self.batch_interval_ms) {
            warn!("batch_interval must be between 1s and 1h; using default");
            self.batch_interval_ms = DEFAULT_BATCH_INTERVAL_MS;
        }
        if self.status_refresh_timer_ms == 0 {
            warn!("queue_status_refresh_timer must be positive; using default");
            self.status_refresh_timer_ms = DEFAULT_STATUS_REFRESH_MS;
        }
        self
    }

    pub fn db_file(&self) -> PathBuf {
        self.data_path.join(QUEUE_DB_NAME)
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn status_refresh_timer(&self) -> Duration {
        Duration::from_millis(self.status_refresh_timer_ms)
    }
}
