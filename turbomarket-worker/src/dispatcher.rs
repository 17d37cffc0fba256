//! Pull jobs from the served queues and run them with bounded concurrency

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use futures_util::future;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore, broadcast},
    task::JoinSet,
};
use turbomarket_common::{Signal, internal, tracing};
use turbomarket_queue::{Claim, JobQueue, JobQueues, JobState, Progress, QueueError};
use turbomarket_tracing::traced;

use crate::{
    Collaborators, DispatcherConfig, RateLimiter,
    handler::{Handlers, JobContext},
};

/// Runs claimed jobs through their handlers
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    queues: JobQueues,
    handlers: Arc<Handlers>,
    limiter: Arc<RateLimiter>,
    running: Arc<AtomicBool>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(config: DispatcherConfig, queues: JobQueues, collaborators: Collaborators) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit));
        let handlers = Arc::new(Handlers::new(
            collaborators,
            Arc::clone(&limiter),
            queues.clone(),
            config.delivery_queue.clone(),
        ));

        Self {
            config,
            queues,
            handlers,
            limiter,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag that is set while [`Dispatcher::serve`] is running
    #[must_use]
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Claim and run jobs until shutdown.
    ///
    /// On [`Signal::Shutdown`], claiming stops and in-flight jobs get
    /// `shutdown_timeout` to finish. Jobs still running after that stay
    /// active in the store and are re-queued by the next restore.
    ///
    /// # Errors
    /// [`QueueError::InvalidQueueName`] if a configured queue name is unusable
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(&self, mut shutdown: broadcast::Receiver<Signal>) -> Result<(), QueueError> {
        let queues = self
            .config
            .queues
            .iter()
            .map(|name| self.queues.queue(name))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.config.queues.contains(&self.config.delivery_queue) {
            tracing::warn!(
                delivery_queue = %self.config.delivery_queue,
                "Delivery queue is not served by this dispatcher; chained send jobs wait for another worker"
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        self.running.store(true, Ordering::SeqCst);
        internal!(
            level = INFO,
            "Dispatcher serving {:?} with concurrency {}",
            self.config.queues,
            self.config.concurrency
        );

        loop {
            let claimed = self.fill(&queues, &semaphore, &mut tasks).await;
            let has_capacity = semaphore.available_permits() > 0;

            tokio::select! {
                biased;

                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!("Dispatcher received shutdown signal");
                        }
                        Err(err) => {
                            tracing::error!("Dispatcher shutdown channel error: {err}");
                        }
                    }
                    break;
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    report(joined);
                }
                () = std::future::ready(()), if claimed > 0 && has_capacity => {}
                () = wait_for_work(&queues, self.config.poll_interval()), if claimed == 0 && has_capacity => {}
            }
        }

        self.drain(tasks).await;
        self.running.store(false, Ordering::SeqCst);
        internal!(level = INFO, "Dispatcher shutdown complete");

        Ok(())
    }

    /// Claim from each queue in turn while permits remain
    async fn fill(
        &self,
        queues: &[JobQueue],
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<()>,
    ) -> usize {
        let mut claimed = 0;

        for queue in queues {
            while let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() {
                let capacity = semaphore.available_permits() + 1;
                let Some(claim) = queue.claim_next(capacity).await else {
                    drop(permit);
                    break;
                };

                claimed += 1;
                tasks.spawn(process(
                    queue.clone(),
                    claim,
                    Arc::clone(&self.handlers),
                    permit,
                ));
            }
        }

        claimed
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }

        let timeout = self.config.shutdown_timeout();
        let start = Instant::now();
        internal!(
            level = INFO,
            "Waiting up to {}s for {} in-flight jobs",
            timeout.as_secs(),
            tasks.len()
        );

        let finished = tokio::time::timeout(timeout, async {
            while let Some(joined) = tasks.join_next().await {
                report(joined);
            }
        })
        .await;

        if finished.is_ok() {
            internal!(
                "All in-flight jobs completed in {:.1}s",
                start.elapsed().as_secs_f64()
            );
        } else {
            tracing::warn!(
                "Shutdown timeout exceeded, {} in-flight jobs will be retried on restart",
                tasks.len()
            );
            tasks.abort_all();
        }
    }
}

/// Until any served queue signals work, or `poll` elapses
async fn wait_for_work(queues: &[JobQueue], poll: Duration) {
    if queues.is_empty() {
        tokio::time::sleep(poll).await;
        return;
    }

    let waits = queues
        .iter()
        .map(|queue| Box::pin(queue.wait_for_job(poll)));
    let _ = future::select_all(waits).await;
}

fn report(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::error!("Job task ended abnormally: {err}");
    }
}

/// Run one claimed job and settle it
async fn process(
    queue: JobQueue,
    claim: Claim,
    handlers: Arc<Handlers>,
    _permit: OwnedSemaphorePermit,
) {
    let Claim { job, token } = claim;
    let ctx = JobContext {
        queue: &queue,
        job: &job,
        token,
    };

    tracing::debug!(
        queue = %queue.name(),
        job_id = %job.id,
        kind = %job.payload.kind(),
        attempt = job.attempt + 1,
        "Processing job"
    );

    if let Err(err) = queue.update_progress(&job.id, token, Progress::percent(10)).await {
        tracing::warn!(job_id = %job.id, "Lost claim before processing: {err}");
        return;
    }

    let settled = match handlers.handle(&ctx).await {
        Ok(result) => {
            if let Err(err) = queue.update_progress(&job.id, token, Progress::percent(100)).await {
                tracing::debug!(job_id = %job.id, "Final progress update dropped: {err}");
            }
            queue.complete(&job.id, token, result).await
        }
        Err(err) => queue.fail(&job.id, token, err.into_failure()).await,
    };

    match settled {
        Ok(job) if job.state == JobState::Completed => {
            tracing::info!(queue = %queue.name(), job_id = %job.id, kind = %job.payload.kind(), "Job completed");
        }
        Ok(job) if job.state == JobState::Failed => {
            tracing::error!(
                queue = %queue.name(),
                job_id = %job.id,
                kind = %job.payload.kind(),
                attempts = job.attempt,
                error = %job.error.as_ref().map_or_else(String::new, ToString::to_string),
                "Job failed"
            );
        }
        Ok(job) => {
            tracing::warn!(
                queue = %queue.name(),
                job_id = %job.id,
                attempt = job.attempt,
                max_attempts = job.max_attempts,
                "Job attempt failed, will retry"
            );
        }
        Err(err) => {
            tracing::warn!(job_id = %job.id, "Could not settle job: {err}");
        }
    }
}
