//! The job queue itself

mod registry;
mod state;

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
pub use registry::JobQueues;
use state::{QueueState, Transition};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use turbomarket_common::internal;
use turbomarket_tracing::traced;

use crate::{
    Claim, ClaimToken, Clock, Job, JobFailure, JobId, JobOptions, JobPayload, JobState, JobStore,
    Progress, QueueConfig, QueueError, QueueHealth, QueueStats,
};

#[derive(Debug)]
struct Inner {
    name: String,
    config: QueueConfig,
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    state: Mutex<QueueState>,
    /// Serialises store writes so records land in transition order
    writes: tokio::sync::Mutex<()>,
    ready: Notify,
}

/// A named, persistent, prioritised job queue
///
/// Cloning is cheap and every clone refers to the same queue.
///
/// Working state lives in memory behind one lock; each state transition is
/// applied under that lock and then written through to the [`JobStore`].
/// A failed write after a transition is logged and otherwise ignored: the
/// in-memory state stays authoritative until the next restart.
#[derive(Debug, Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub(crate) fn new(
        name: impl Into<String>,
        config: QueueConfig,
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                config,
                store,
                clock,
                state: Mutex::new(QueueState::default()),
                writes: tokio::sync::Mutex::new(()),
                ready: Notify::new(),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    fn now(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    async fn write_through(&self, job: &Job, purged: &[JobId]) {
        if let Err(err) = self.inner.store.save(job).await {
            warn!(
                queue = %self.inner.name,
                job_id = %job.id,
                state = %job.state,
                error = %err,
                "Failed to persist job state"
            );
        }

        for id in purged {
            if let Err(err) = self.inner.store.delete(&self.inner.name, id).await {
                warn!(queue = %self.inner.name, job_id = %id, error = %err, "Failed to delete job record");
            }
        }
    }

    /// Add a job.
    ///
    /// Options left unset fall back to the kind's preset, then to the queue
    /// defaults. A positive `delay` makes the job delayed rather than waiting.
    ///
    /// # Errors
    /// [`QueueError::StoreUnavailable`] if the job could not be persisted; the
    /// job is then not in the queue.
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(queue = %self.inner.name, kind = %payload.kind())), timing(precision = "us"))]
    pub async fn enqueue(&self, payload: JobPayload, options: JobOptions) -> Result<Job, QueueError> {
        let options = options
            .or(payload.kind().preset())
            .or(self.inner.config.job_defaults());

        let _writes = self.inner.writes.lock().await;
        let job = Job::new(&self.inner.name, payload, &options, self.now());

        self.inner
            .store
            .save(&job)
            .await
            .map_err(QueueError::StoreUnavailable)?;

        self.inner.state.lock().insert(job.clone());
        self.inner.ready.notify_one();

        debug!(
            queue = %self.inner.name,
            job_id = %job.id,
            priority = job.priority,
            state = %job.state,
            "Job enqueued"
        );

        Ok(job)
    }

    /// Add several jobs, each independently.
    ///
    /// The result at index `i` belongs to input `i`; one failure does not
    /// stop the others.
    pub async fn enqueue_bulk(
        &self,
        jobs: Vec<(JobPayload, JobOptions)>,
    ) -> Vec<Result<Job, QueueError>> {
        let mut results = Vec::with_capacity(jobs.len());
        for (payload, options) in jobs {
            results.push(self.enqueue(payload, options).await);
        }
        results
    }

    /// Claim the next job for a worker with `worker_capacity` free slots.
    ///
    /// Lowest priority value first, then earliest enqueued. Returns `None`
    /// when nothing is claimable, the queue is paused, or the capacity is zero.
    pub async fn claim_next(&self, worker_capacity: usize) -> Option<Claim> {
        let _writes = self.inner.writes.lock().await;
        let claim = self
            .inner
            .state
            .lock()
            .claim(self.now(), worker_capacity)?;

        self.write_through(&claim.job, &[]).await;
        Some(claim)
    }

    /// Record a successful attempt
    ///
    /// # Errors
    /// [`QueueError::JobNotFound`] if `id` is not active under `token`
    pub async fn complete(
        &self,
        id: &JobId,
        token: ClaimToken,
        result: serde_json::Value,
    ) -> Result<Job, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let Transition { job, purged } = self.inner.state.lock().complete(
            id,
            token,
            result,
            self.now(),
            self.inner.config.keep_completed,
        )?;

        self.write_through(&job, &purged).await;
        Ok(job)
    }

    /// Record a failed attempt.
    ///
    /// A retryable failure with attempts remaining goes back to the queue
    /// after its backoff delay; anything else fails the job for good.
    ///
    /// # Errors
    /// [`QueueError::JobNotFound`] if `id` is not active under `token`
    pub async fn fail(
        &self,
        id: &JobId,
        token: ClaimToken,
        failure: JobFailure,
    ) -> Result<Job, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let Transition { job, purged } = self.inner.state.lock().fail(
            id,
            token,
            failure,
            self.now(),
            &self.inner.config,
        )?;

        self.write_through(&job, &purged).await;

        if job.state == JobState::Delayed {
            debug!(
                queue = %self.inner.name,
                job_id = %job.id,
                attempt = job.attempt,
                ready_at = job.ready_at,
                "Job scheduled for retry"
            );
        }

        Ok(job)
    }

    /// # Errors
    /// [`QueueError::JobNotFound`] if `id` is not active under `token`
    pub async fn update_progress(
        &self,
        id: &JobId,
        token: ClaimToken,
        progress: Progress,
    ) -> Result<Job, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let job = self
            .inner
            .state
            .lock()
            .update_progress(id, token, progress)?;

        self.write_through(&job, &[]).await;
        Ok(job)
    }

    /// Append a line to a job's log
    ///
    /// # Errors
    /// [`QueueError::JobNotFound`] if there is no such job
    pub async fn log(&self, id: &JobId, line: impl Into<String>) -> Result<(), QueueError> {
        let _writes = self.inner.writes.lock().await;
        let job = self.inner.state.lock().add_log(id, line.into())?;
        self.write_through(&job, &[]).await;
        Ok(())
    }

    /// # Errors
    /// [`QueueError::JobNotFound`] if there is no such job
    pub fn logs(&self, id: &JobId) -> Result<Vec<String>, QueueError> {
        self.get(id)
            .map(|job| job.logs)
            .ok_or(QueueError::JobNotFound(*id))
    }

    #[must_use]
    pub fn get(&self, id: &JobId) -> Option<Job> {
        self.inner.state.lock().get(id)
    }

    /// Delete a job that is not being processed
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] for an active job, [`QueueError::JobNotFound`]
    /// if there is no such job
    pub async fn remove(&self, id: &JobId) -> Result<Job, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let job = self.inner.state.lock().remove(id)?;
        self.write_through_delete(&[job.id]).await;
        Ok(job)
    }

    async fn write_through_delete(&self, ids: &[JobId]) {
        for id in ids {
            if let Err(err) = self.inner.store.delete(&self.inner.name, id).await {
                warn!(queue = %self.inner.name, job_id = %id, error = %err, "Failed to delete job record");
            }
        }
    }

    /// Make a delayed job claimable immediately
    ///
    /// # Errors
    /// [`QueueError::InvalidState`] unless the job is delayed
    pub async fn promote(&self, id: &JobId) -> Result<Job, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let job = self.inner.state.lock().promote(id, self.now())?;
        self.write_through(&job, &[]).await;
        self.inner.ready.notify_one();
        Ok(job)
    }

    /// Re-enqueue up to `limit` failed jobs with their attempt counters reset
    #[traced(instrument(level = tracing::Level::INFO, skip(self), fields(queue = %self.inner.name)))]
    pub async fn retry_failed(&self, limit: usize) -> Vec<JobId> {
        let _writes = self.inner.writes.lock().await;
        let retried = self.inner.state.lock().retry_failed(limit);

        for job in &retried {
            self.write_through(job, &[]).await;
        }

        if !retried.is_empty() {
            info!(queue = %self.inner.name, count = retried.len(), "Retrying failed jobs");
            self.inner.ready.notify_one();
        }

        retried.into_iter().map(|job| job.id).collect()
    }

    /// Remove up to `limit` jobs in `state` that settled more than `grace` ago.
    /// A `limit` of zero means no limit.
    pub async fn clean(&self, grace: Duration, state: JobState, limit: usize) -> Vec<JobId> {
        let grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);

        let _writes = self.inner.writes.lock().await;
        let removed = self
            .inner
            .state
            .lock()
            .clean(grace_ms, state, limit, self.now());

        self.write_through_delete(&removed).await;

        if !removed.is_empty() {
            info!(queue = %self.inner.name, %state, count = removed.len(), "Cleaned jobs");
        }

        removed
    }

    /// Stop handing out jobs. Active jobs run to completion.
    pub fn pause(&self) {
        self.inner.state.lock().set_paused(true);
        info!(queue = %self.inner.name, "Queue paused");
    }

    pub fn resume(&self) {
        self.inner.state.lock().set_paused(false);
        self.inner.ready.notify_one();
        info!(queue = %self.inner.name, "Queue resumed");
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.state.lock().is_paused()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats(self.now())
    }

    #[must_use]
    pub fn health(&self, worker_running: bool) -> QueueHealth {
        QueueHealth::assess(self.stats(), worker_running, &self.inner.config)
    }

    /// Reload this queue's jobs from the store
    ///
    /// Jobs that were active when the previous process stopped are returned
    /// to waiting, so they will run again.
    ///
    /// # Errors
    /// [`QueueError::StoreUnavailable`] if the store cannot be read
    pub async fn restore(&self) -> Result<usize, QueueError> {
        let _writes = self.inner.writes.lock().await;
        let jobs = self
            .inner
            .store
            .load(&self.inner.name)
            .await
            .map_err(QueueError::StoreUnavailable)?;

        let restored = self.inner.state.lock().restore(jobs);
        if restored > 0 {
            internal!(
                level = INFO,
                "Restored {restored} jobs into queue {}",
                self.inner.name
            );
            self.inner.ready.notify_one();
        }

        Ok(restored)
    }

    /// Wait until a job may have become claimable, or `timeout` elapses
    ///
    /// Wakeups are hints; the caller must still try to claim.
    pub async fn wait_for_job(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.inner.ready.notified()).await;
    }

    /// Check the backing store is reachable
    ///
    /// # Errors
    /// [`QueueError::StoreUnavailable`] if it is not
    pub async fn ping(&self) -> Result<(), QueueError> {
        self.inner
            .store
            .ping()
            .await
            .map_err(QueueError::StoreUnavailable)
    }
}
