use serde::{Deserialize, Serialize};

use crate::QueueConfig;

/// Point-in-time job counts for one queue
///
/// Counts are read under the queue lock but may be stale by the time the
/// caller sees them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    #[serde(default)]
    pub paused: bool,
}

impl QueueStats {
    /// Jobs not yet settled
    #[must_use]
    pub const fn pending(&self) -> usize {
        self.waiting + self.active + self.delayed
    }
}

/// Health verdict for one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub is_healthy: bool,
    pub stats: QueueStats,
    pub worker_running: bool,
    pub errors: Vec<String>,
}

impl QueueHealth {
    /// Judge `stats` against the thresholds in `config`
    #[must_use]
    pub fn assess(stats: QueueStats, worker_running: bool, config: &QueueConfig) -> Self {
        let mut errors = Vec::new();

        #[allow(clippy::cast_precision_loss)]
        let high_failure_rate =
            stats.failed as f64 > stats.completed as f64 * config.max_failure_ratio;
        if high_failure_rate {
            errors.push("High failure rate detected".to_string());
        }

        if stats.active > 0 && !worker_running {
            errors.push("Active jobs detected but no running workers".to_string());
        }

        if stats.waiting > config.max_waiting {
            errors.push("Too many waiting jobs".to_string());
        }

        Self {
            is_healthy: errors.is_empty(),
            stats,
            worker_running,
            errors,
        }
    }
}
