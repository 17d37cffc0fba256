//! The TurboMarket worker process.
//!
//! [`Controller`] builds the job queues, the dispatcher, the analytics sink
//! and the health server from a [`Config`], and runs them until shutdown.

pub mod config;
pub mod controller;

pub use config::{Config, find_config_file};
pub use controller::Controller;
