//! Analytics events emitted by the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An append-only usage or outcome record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Create an event stamped with the current time
    #[must_use]
    pub fn new(event_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            user_id: user_id.into(),
            session_id: String::new(),
            timestamp: Utc::now(),
            properties: serde_json::Map::new(),
        }
    }

    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
