use std::time::Duration;

use serde::{Deserialize, Serialize};
use turbomarket_queue::DEFAULT_QUEUE;

const fn default_concurrency() -> usize {
    5
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_queues() -> Vec<String> {
    vec![DEFAULT_QUEUE.to_string()]
}

fn default_delivery_queue() -> String {
    DEFAULT_QUEUE.to_string()
}

const fn default_rate_max() -> u32 {
    100
}

const fn default_rate_window_ms() -> u64 {
    60_000
}

/// Global ceiling on gateway sends: at most `max` per `window_ms`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_max")]
    pub max: u32,
    #[serde(default = "default_rate_window_ms")]
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max: default_rate_max(),
            window_ms: default_rate_window_ms(),
        }
    }
}

/// The `worker` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Jobs processed at once, across every served queue
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Queues to claim from, in the order they are polled
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Longest wait between claim attempts when every queue is idle
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Where send jobs chained from generated content are enqueued
    #[serde(default = "default_delivery_queue")]
    pub delivery_queue: String,

    /// How long shutdown waits for in-flight jobs
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate_limit: RateLimitConfig::default(),
            queues: default_queues(),
            poll_interval_ms: default_poll_interval_ms(),
            delivery_queue: default_delivery_queue(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl DispatcherConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
