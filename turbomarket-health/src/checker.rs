//! Health check logic

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use turbomarket_analytics::EventSink;
use turbomarket_common::Signal;
use turbomarket_queue::{JobQueues, QueueHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
}

impl Status {
    const fn from_ok(ok: bool) -> Self {
        if ok { Self::Healthy } else { Self::Unhealthy }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueService {
    pub status: Status,
    pub queues: BTreeMap<String, QueueHealth>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsService {
    pub status: Status,
    pub recorded: u64,
    pub dropped: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Services {
    pub queue: QueueService,
    pub analytics: AnalyticsService,
}

/// The document served at `/health` and logged periodically
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: Status,
    pub services: Services,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

/// Gathers the health of the queues and the analytics side channel
#[derive(Debug, Clone)]
pub struct HealthChecker {
    queues: JobQueues,
    served: Vec<String>,
    events: EventSink,
    worker_running: Arc<AtomicBool>,
    max_pending: usize,
}

impl HealthChecker {
    #[must_use]
    pub const fn new(
        queues: JobQueues,
        served: Vec<String>,
        events: EventSink,
        worker_running: Arc<AtomicBool>,
        max_pending: usize,
    ) -> Self {
        Self {
            queues,
            served,
            events,
            worker_running,
            max_pending,
        }
    }

    #[must_use]
    pub const fn queues(&self) -> &JobQueues {
        &self.queues
    }

    /// Liveness only needs a response; a dead process cannot give one
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        true
    }

    fn worker_running(&self) -> bool {
        self.worker_running.load(Ordering::SeqCst)
    }

    /// Ready when the worker runs, the job store answers, and the backlog is
    /// below the configured ceiling
    pub async fn is_ready(&self) -> bool {
        let store_ok = self.queues.ping().await.is_ok();
        let pending: usize = self
            .served
            .iter()
            .filter_map(|name| self.queues.stats(name).ok())
            .map(|stats| stats.pending())
            .sum();

        let ready = self.worker_running() && store_ok && pending < self.max_pending;
        if !ready {
            tracing::debug!(
                worker_running = self.worker_running(),
                store_ok,
                pending,
                max_pending = self.max_pending,
                "Readiness check failed"
            );
        }

        ready
    }

    /// Build a full report
    pub async fn report(&self) -> HealthReport {
        let worker_running = self.worker_running();

        let mut queues = BTreeMap::new();
        let mut errors = Vec::new();
        for name in &self.served {
            match self.queues.queue(name) {
                Ok(queue) => {
                    queues.insert(name.clone(), queue.health(worker_running));
                }
                Err(err) => errors.push(err.to_string()),
            }
        }

        if let Err(err) = self.queues.ping().await {
            errors.push(err.to_string());
        }

        let queue_ok = errors.is_empty() && queues.values().all(|health| health.is_healthy);

        let sink = self.events.stats();
        let analytics_error = self.events.ping().await.err().map(|err| err.to_string());
        let analytics = AnalyticsService {
            status: Status::from_ok(analytics_error.is_none()),
            recorded: sink.recorded,
            dropped: sink.dropped,
            failed: sink.failed,
            error: analytics_error,
        };

        let status = Status::from_ok(queue_ok && analytics.status == Status::Healthy);

        HealthReport {
            status,
            services: Services {
                queue: QueueService {
                    status: Status::from_ok(queue_ok),
                    queues,
                    errors,
                },
                analytics,
            },
            timestamp: Utc::now(),
        }
    }

    /// Log a report every `interval` until shutdown
    pub async fn monitor(&self, interval: Duration, mut shutdown: broadcast::Receiver<Signal>) {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let report = self.report().await;
                    let summary = serde_json::to_string(&report.services).unwrap_or_default();

                    if report.is_healthy() {
                        tracing::info!(services = %summary, "Health check passed");
                    } else {
                        tracing::warn!(services = %summary, "Health check failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Health monitor stopped");
                    break;
                }
            }
        }
    }
}
