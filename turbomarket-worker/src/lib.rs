//! The worker side of the pipeline.
//!
//! A [`Dispatcher`] claims jobs from its configured queues, routes each to the
//! handler for its kind, and settles the job with the handler's result or a
//! classified [`JobError`]. Gateway sends across every handler share one
//! [`RateLimiter`].

mod config;
mod dispatcher;
mod error;
mod handler;
mod rate_limiter;

pub use config::{DispatcherConfig, RateLimitConfig};
pub use dispatcher::Dispatcher;
pub use error::JobError;
pub use handler::Collaborators;
pub use rate_limiter::RateLimiter;
