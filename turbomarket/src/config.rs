//! The process configuration file

use std::path::{Path, PathBuf};

use serde::Deserialize;
use turbomarket_analytics::AnalyticsConfig;
use turbomarket_content::ComposerConfig;
use turbomarket_health::HealthConfig;
use turbomarket_queue::{QueueConfig, StoreConfig};
use turbomarket_worker::DispatcherConfig;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "TURBOMARKET_CONFIG";

/// Searched in order when neither `--config` nor [`CONFIG_ENV`] is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = [
    "./turbomarket.config.ron",
    "/etc/turbomarket/turbomarket.config.ron",
];

/// Every section is optional; a file containing `()` runs with defaults.
///
/// ```ron
/// #![enable(implicit_some, unwrap_variant_newtypes)]
/// (
///     store: File(path: "/var/lib/turbomarket/jobs"),
///     queue: (max_attempts: 3),
///     worker: (concurrency: 5, queues: ["email-processing"]),
///     analytics: (path: "/var/lib/turbomarket/events.jsonl"),
///     health: (listen_address: "127.0.0.1:8080"),
/// )
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default, alias = "dispatcher")]
    pub worker: DispatcherConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[serde(default)]
    pub content: ComposerConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

impl Config {
    /// Read and parse a RON configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))
    }

    /// Parse RON configuration text
    ///
    /// # Errors
    /// Returns the parser's error if `content` is not a valid configuration
    pub fn parse(content: &str) -> Result<Self, ron::error::SpannedError> {
        ron::from_str(content)
    }

    /// Every queue the process touches: the served queues plus the queue
    /// generated content is handed to
    #[must_use]
    pub fn queue_names(&self) -> Vec<String> {
        let mut names = self.worker.queues.clone();
        if !names.contains(&self.worker.delivery_queue) {
            names.push(self.worker.delivery_queue.clone());
        }
        names
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` argument)
/// 2. `TURBOMARKET_CONFIG` environment variable
/// 3. ./turbomarket.config.ron (current working directory)
/// 4. /etc/turbomarket/turbomarket.config.ron (system-wide config)
///
/// # Errors
/// Returns an error naming every location tried when none exists
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    locate(
        explicit,
        std::env::var_os(CONFIG_ENV).map(PathBuf::from),
        &DEFAULT_CONFIG_PATHS.map(PathBuf::from),
    )
}

fn locate(
    explicit: Option<PathBuf>,
    from_env: Option<PathBuf>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(path) = from_env {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}
