//! Durable storage for job records

mod file;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
pub use file::FileJobStore;
pub use memory::MemoryJobStore;
use serde::Deserialize;

use crate::{Job, JobId, StoreError};

/// Where job records live between restarts.
///
/// The queue keeps its working state in memory and writes every transition
/// through to the store; [`JobStore::load`] is only used to rebuild that state.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Insert or replace the record for `job`
    async fn save(&self, job: &Job) -> Result<(), StoreError>;

    /// Remove a record; removing a missing record is not an error
    async fn delete(&self, queue: &str, id: &JobId) -> Result<(), StoreError>;

    /// Every record belonging to `queue`, in no particular order
    async fn load(&self, queue: &str) -> Result<Vec<Job>, StoreError>;

    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Configuration for the job store
///
/// ```ron
/// store: File((path: "/var/lib/turbomarket/jobs"))
/// ```
///
/// ```ron
/// store: Memory((capacity: Some(1000)))
/// ```
#[derive(Debug, Clone, Deserialize)]
pub enum StoreConfig {
    /// One JSON file per job under a directory
    File(FileJobStore),
    /// Process memory only; jobs do not survive a restart
    Memory(MemoryConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of job records (omit for unlimited)
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

impl StoreConfig {
    /// Initialise and return the configured store
    ///
    /// # Errors
    /// Returns an error if the store directory cannot be created
    pub fn into_store(self) -> Result<Arc<dyn JobStore>, StoreError> {
        match self {
            Self::File(mut store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryJobStore::new()) as Arc<dyn JobStore>,
                |capacity| Arc::new(MemoryJobStore::with_capacity(capacity)),
            )),
        }
    }
}

/// Reject queue names that cannot be used as a single path component
pub(crate) fn validate_queue_name(queue: &str) -> Result<(), StoreError> {
    let valid = !queue.is_empty()
        && queue
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !queue.starts_with('.');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidQueueName(queue.to_string()))
    }
}
