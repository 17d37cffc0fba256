//! Analytics events for the TurboMarket pipeline.
//!
//! Handlers hand events to an [`EventSink`], which never blocks and never
//! fails the caller. A background task drains the sink into an
//! [`EventRecorder`]; recorder failures are logged and the event dropped.

mod error;
mod jsonl;
mod memory;
mod sink;

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use turbomarket_common::Event;

pub use error::RecorderError;
pub use jsonl::JsonLinesRecorder;
pub use memory::MemoryRecorder;
pub use sink::{EventSink, SinkStats};

/// Event names emitted by the pipeline
pub mod names {
    pub const GENERATION_STARTED: &str = "email_generation_started";
    pub const GENERATION_COMPLETED: &str = "email_generation_completed";
    pub const EMAIL_SENT: &str = "email_sent";
    pub const BULK_EMAIL_SENT: &str = "bulk_email_sent";
}

/// An event in the shape of the analytical store's `events` table.
///
/// `properties` is the JSON-encoded property map, as the store keeps it in a
/// string column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRow {
    pub event_name: String,
    pub user_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub properties: String,
}

impl TryFrom<&Event> for EventRow {
    type Error = serde_json::Error;

    fn try_from(event: &Event) -> Result<Self, Self::Error> {
        Ok(Self {
            event_name: event.event_name.clone(),
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            properties: serde_json::to_string(&event.properties)?,
        })
    }
}

/// An append-only analytical store
#[async_trait]
pub trait EventRecorder: Send + Sync + std::fmt::Debug {
    /// Append one row
    ///
    /// # Errors
    /// Any failure to persist the row
    async fn record(&self, row: &EventRow) -> Result<(), RecorderError>;

    /// Check that the store is reachable
    ///
    /// # Errors
    /// [`RecorderError::Unavailable`] or an I/O error when it is not
    async fn ping(&self) -> Result<(), RecorderError>;
}

const fn default_channel_capacity() -> usize {
    1024
}

/// The `analytics` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Append events to this JSON lines file; events are kept in memory when
    /// unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Events buffered between handlers and the recorder before new ones are
    /// dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            path: None,
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl AnalyticsConfig {
    /// Build the configured recorder
    ///
    /// # Errors
    /// When the JSON lines file's directory cannot be created
    pub async fn recorder(&self) -> Result<Arc<dyn EventRecorder>, RecorderError> {
        match &self.path {
            Some(path) => Ok(Arc::new(JsonLinesRecorder::open(path).await?)),
            None => Ok(Arc::new(MemoryRecorder::default())),
        }
    }
}
