//! Agent Events
//!
//! Events are value objects: they are built per publish or dispatch and never
//! mutated once sent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An event delivered to, or published by, an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    /// Event type identifier (e.g., "TemperatureChanged")
    pub event_type: String,

    pub timestamp: DateTime<Utc>,

    /// Event payload
    #[serde(default)]
    pub data: Value,

    /// Correlates a request with its response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_agent_id: Option<String>,
}

impl AgentEvent {
    /// Create an event stamped with the current time
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            data,
            correlation_id: None,
            source_agent_id: None,
        }
    }

    /// Create an event with serialized data
    pub fn with_data<T: Serialize>(
        event_type: impl Into<String>,
        data: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(event_type, serde_json::to_value(data)?))
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_source(mut self, source_agent_id: impl Into<String>) -> Self {
        self.source_agent_id = Some(source_agent_id.into());
        self
    }

    /// Get a field from the event data
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Deserialize the event data to a specific type
    pub fn parse_data<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.data.clone())
    }
}
