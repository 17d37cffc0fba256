//! Health check configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The `health` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Start the HTTP server
    ///
    /// The periodic health log runs either way.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Address to bind the HTTP server
    ///
    /// Common values:
    /// - `[::]:8080` (IPv6 any address, port 8080)
    /// - `0.0.0.0:8080` (IPv4 any address, port 8080)
    /// - `127.0.0.1:8080` (localhost only, port 8080)
    #[serde(default = "default_listen_address")]
    pub listen_address: String,

    /// Seconds between logged health reports
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Readiness fails once this many jobs are pending across served queues
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

const fn default_enabled() -> bool {
    true
}

fn default_listen_address() -> String {
    "[::]:8080".to_string()
}

const fn default_interval_secs() -> u64 {
    30
}

const fn default_max_pending() -> usize {
    10_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen_address: default_listen_address(),
            interval_secs: default_interval_secs(),
            max_pending: default_max_pending(),
        }
    }
}

impl HealthConfig {
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}
