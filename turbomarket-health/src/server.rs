//! Health and job submission HTTP server

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use turbomarket_common::Signal;
use turbomarket_queue::{JobId, JobSubmission, QueueError};

use crate::{HealthChecker, HealthConfig, HealthError};

/// Serves `/health`, the `/health/live` and `/health/ready` checks, and the
/// `/queues/{queue}/...` job endpoints
pub struct HealthServer {
    listener: TcpListener,
    router: Router,
}

impl HealthServer {
    /// Bind the configured address
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn new(config: &HealthConfig, checker: Arc<HealthChecker>) -> Result<Self, HealthError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| HealthError::BindError {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(
            address = %config.listen_address,
            "Health server bound successfully"
        );

        Ok(Self {
            listener,
            router: router(checker),
        })
    }

    /// Run until a shutdown signal is received
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), HealthError> {
        tracing::info!("Health server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Health server received shutdown signal");
            })
            .await
            .map_err(|e| HealthError::ServerError(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// The application routes, without a listener
pub fn router(checker: Arc<HealthChecker>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/queues/{queue}/jobs", post(submit_handler))
        .route("/queues/{queue}/jobs/{id}", get(job_handler))
        .route("/queues/{queue}/stats", get(stats_handler))
        .with_state(checker)
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
}

fn queue_error(err: &QueueError) -> Response {
    let status = match err {
        QueueError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        QueueError::JobNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidQueueName(_)
        | QueueError::UnsupportedJobKind(_)
        | QueueError::InvalidPayload { .. } => StatusCode::BAD_REQUEST,
        QueueError::InvalidState { .. } => StatusCode::CONFLICT,
    };

    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

async fn health_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    let report = checker.report().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report)).into_response()
}

async fn liveness_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    if checker.is_alive() {
        (StatusCode::OK, "OK").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable").into_response()
    }
}

async fn readiness_handler(State(checker): State<Arc<HealthChecker>>) -> Response {
    if checker.is_ready().await {
        (StatusCode::OK, "OK").into_response()
    } else {
        let report = checker.report().await;
        tracing::warn!(status = ?report.status, "Readiness check failed");
        (StatusCode::SERVICE_UNAVAILABLE, Json(report)).into_response()
    }
}

async fn submit_handler(
    State(checker): State<Arc<HealthChecker>>,
    Path(queue): Path<String>,
    Json(submission): Json<JobSubmission>,
) -> Response {
    match checker.queues().submit(&queue, submission).await {
        Ok(job) => (
            StatusCode::ACCEPTED,
            Json(json!({ "id": job.id, "queue": job.queue, "state": job.state })),
        )
            .into_response(),
        Err(err) => {
            tracing::debug!(queue = %queue, "Job submission rejected: {err}");
            queue_error(&err)
        }
    }
}

async fn job_handler(
    State(checker): State<Arc<HealthChecker>>,
    Path((queue, id)): Path<(String, String)>,
) -> Response {
    let Ok(id) = id.parse::<JobId>() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Invalid job id: {id}") })),
        )
            .into_response();
    };

    match checker.queues().queue(&queue) {
        Ok(queue) => match queue.get(&id) {
            Some(job) => Json(job).into_response(),
            None => queue_error(&QueueError::JobNotFound(id)),
        },
        Err(err) => queue_error(&err),
    }
}

async fn stats_handler(
    State(checker): State<Arc<HealthChecker>>,
    Path(queue): Path<String>,
) -> Response {
    match checker.queues().stats(&queue) {
        Ok(stats) => Json(stats).into_response(),
        Err(err) => queue_error(&err),
    }
}
