//! Health reporting for the TurboMarket worker
//!
//! [`HealthChecker`] combines queue health, job store reachability and the
//! analytics sink into one [`HealthReport`], which is logged on an interval
//! and served over HTTP.
//!
//! # Endpoints
//!
//! - **`/health`** - Full report; 503 when any service is unhealthy
//! - **`/health/live`** - Liveness check: 200 while the process runs
//! - **`/health/ready`** - Readiness check: 200 while jobs can be accepted
//! - **`POST /queues/{queue}/jobs`** - Submit `{kind, payload, options}`
//! - **`GET /queues/{queue}/jobs/{id}`** - Poll a job
//! - **`GET /queues/{queue}/stats`** - Queue counts

mod checker;
mod config;
mod error;
mod server;

pub use checker::{AnalyticsService, HealthChecker, HealthReport, QueueService, Services, Status};
pub use config::HealthConfig;
pub use error::HealthError;
pub use server::{HealthServer, router};
