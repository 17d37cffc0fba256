use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    Claim, Clock, Job, JobQueue, JobStore, JobSubmission, QueueConfig, QueueError, QueueStats,
    SystemClock, store::validate_queue_name,
};

/// Every named queue in the process, created on first use
///
/// All queues share one store, one clock and one set of defaults.
#[derive(Debug, Clone)]
pub struct JobQueues {
    queues: Arc<DashMap<String, JobQueue>>,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
}

impl JobQueues {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, config: QueueConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    #[must_use]
    pub fn with_clock(store: Arc<dyn JobStore>, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            store,
            clock,
            config,
        }
    }

    /// The queue called `name`, creating it if needed
    ///
    /// # Errors
    /// [`QueueError::InvalidQueueName`] if `name` cannot be used as a storage key
    pub fn queue(&self, name: &str) -> Result<JobQueue, QueueError> {
        if let Some(queue) = self.queues.get(name) {
            return Ok(queue.clone());
        }

        validate_queue_name(name).map_err(|_| QueueError::InvalidQueueName(name.to_string()))?;

        Ok(self
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                JobQueue::new(
                    name,
                    self.config.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.clock),
                )
            })
            .clone())
    }

    /// Names of every queue created so far, sorted
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        names.sort();
        names
    }

    /// Validate and enqueue an externally supplied job
    ///
    /// # Errors
    /// [`QueueError::UnsupportedJobKind`] or [`QueueError::InvalidPayload`] if
    /// the submission does not decode, otherwise as [`JobQueue::enqueue`]
    pub async fn submit(&self, queue: &str, submission: JobSubmission) -> Result<Job, QueueError> {
        let (payload, options) = submission.decode()?;
        self.queue(queue)?.enqueue(payload, options).await
    }

    /// # Errors
    /// [`QueueError::InvalidQueueName`] for an unusable name
    pub async fn claim_next(
        &self,
        queue: &str,
        worker_capacity: usize,
    ) -> Result<Option<Claim>, QueueError> {
        Ok(self.queue(queue)?.claim_next(worker_capacity).await)
    }

    /// # Errors
    /// [`QueueError::InvalidQueueName`] for an unusable name
    pub fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        Ok(self.queue(queue)?.stats())
    }

    /// Reload every named queue from the store
    ///
    /// # Errors
    /// The first store error encountered
    pub async fn restore(&self, names: &[String]) -> Result<usize, QueueError> {
        let mut restored = 0;
        for name in names {
            restored += self.queue(name)?.restore().await?;
        }
        Ok(restored)
    }

    /// Check the shared store is reachable
    ///
    /// # Errors
    /// [`QueueError::StoreUnavailable`] if it is not
    pub async fn ping(&self) -> Result<(), QueueError> {
        self.store.ping().await.map_err(QueueError::StoreUnavailable)
    }
}
