use serde::{Deserialize, Serialize};

use crate::{Backoff, JobOptions};

/// Defaults and limits shared by every queue in a [`JobQueues`](crate::JobQueues)
///
/// # Example
///
/// ```ron
/// queue: (
///     max_attempts: 3,
///     backoff: (type: exponential, delay: 2000),
///     max_backoff_ms: 3600000,
///     keep_completed: 100,
///     keep_failed: 50,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "QueueConfig::default_priority")]
    pub priority: u32,

    #[serde(default = "QueueConfig::default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub backoff: Backoff,

    /// Upper bound on any single backoff delay
    #[serde(default = "QueueConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Random spread applied to backoff delays (0.2 = ±20%)
    #[serde(default)]
    pub jitter_factor: f64,

    /// Completed jobs retained for inspection; older ones are purged
    #[serde(default = "QueueConfig::default_keep_completed")]
    pub keep_completed: usize,

    /// Failed jobs retained for inspection; older ones are purged
    #[serde(default = "QueueConfig::default_keep_failed")]
    pub keep_failed: usize,

    /// Waiting backlog above which a queue reports itself unhealthy
    #[serde(default = "QueueConfig::default_max_waiting")]
    pub max_waiting: usize,

    /// Failed-to-completed ratio above which a queue reports itself unhealthy
    #[serde(default = "QueueConfig::default_max_failure_ratio")]
    pub max_failure_ratio: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority: Self::default_priority(),
            max_attempts: Self::default_max_attempts(),
            backoff: Backoff::default(),
            max_backoff_ms: Self::default_max_backoff_ms(),
            jitter_factor: 0.0,
            keep_completed: Self::default_keep_completed(),
            keep_failed: Self::default_keep_failed(),
            max_waiting: Self::default_max_waiting(),
            max_failure_ratio: Self::default_max_failure_ratio(),
        }
    }
}

impl QueueConfig {
    const fn default_priority() -> u32 {
        0
    }

    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_max_backoff_ms() -> u64 {
        3_600_000
    }

    const fn default_keep_completed() -> usize {
        100
    }

    const fn default_keep_failed() -> usize {
        50
    }

    const fn default_max_waiting() -> usize {
        1000
    }

    const fn default_max_failure_ratio() -> f64 {
        0.1
    }

    /// The queue-wide fallback for options nobody set
    #[must_use]
    pub const fn job_defaults(&self) -> JobOptions {
        JobOptions::new()
            .priority(self.priority)
            .delay(0)
            .max_attempts(self.max_attempts)
            .backoff(self.backoff)
    }
}
