//! Agent-facing capabilities
//!
//! A plugin receives an `AgentContext` at initialization and uses it to log,
//! read configuration, publish events and reach other agents through
//! `AgentReference` handles.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::{AgentEvent, PluginError, PluginResult, coerce_value};

/// Default wait for a correlated response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

// ─────────────────────────────────────────────────────────────────────────────
// Agent Logger
// ─────────────────────────────────────────────────────────────────────────────

/// Logger that tags every record with the owning agent id
#[derive(Debug, Clone)]
pub struct AgentLogger {
    agent_id: Arc<str>,
}

impl AgentLogger {
    pub fn new(agent_id: impl Into<Arc<str>>) -> Self {
        Self {
            agent_id: agent_id.into(),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn debug(&self, message: &str) {
        tracing::debug!(agent_id = %self.agent_id, "{}", message);
    }

    pub fn info(&self, message: &str) {
        tracing::info!(agent_id = %self.agent_id, "{}", message);
    }

    pub fn warn(&self, message: &str) {
        tracing::warn!(agent_id = %self.agent_id, "{}", message);
    }

    pub fn error(&self, message: &str) {
        tracing::error!(agent_id = %self.agent_id, "{}", message);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Context
// ─────────────────────────────────────────────────────────────────────────────

/// Capability bundle handed to a plugin when it is initialized
#[async_trait]
pub trait AgentContext: Send + Sync {
    /// Identifier of the hosting agent
    fn agent_id(&self) -> &str;

    fn logger(&self) -> &AgentLogger;

    /// Plugin configuration; empty when none was supplied
    fn configuration(&self) -> &Map<String, Value>;

    /// Publish an event on the host's stream without waiting for subscribers
    async fn publish_event(&self, event: AgentEvent) -> PluginResult<()>;

    /// Publish an event and wait for a correlated response
    ///
    /// `None` uses [`DEFAULT_RESPONSE_TIMEOUT`].
    async fn publish_event_with_response(
        &self,
        event: AgentEvent,
        timeout: Option<Duration>,
    ) -> PluginResult<Value>;

    /// Reference to another agent; empty ids are accepted
    async fn get_agent(&self, agent_id: &str) -> PluginResult<Arc<dyn AgentReference>>;

    /// Register child agents of this agent
    async fn register_agents(&self, agent_ids: &[String]) -> PluginResult<()>;

    /// Subscribe this agent to events published by the given agents
    async fn subscribe_to_agents(&self, agent_ids: &[String]) -> PluginResult<()>;

    /// Complete a pending correlated request
    async fn respond(&self, correlation_id: &str, response: Value) -> PluginResult<()>;
}

impl dyn AgentContext {
    /// Publish an event and deserialize the correlated response
    pub async fn publish_with_response<T: DeserializeOwned>(
        &self,
        event: AgentEvent,
        timeout: Option<Duration>,
    ) -> PluginResult<T> {
        let response = self.publish_event_with_response(event, timeout).await?;
        coerce_value(response)
    }

    /// Get a config value as a specific type
    pub fn config<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.configuration()
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Get a config string
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration().get(key).and_then(|v| v.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent Reference
// ─────────────────────────────────────────────────────────────────────────────

/// Handle used by one agent to call another
///
/// Failures are always wrapped in `AgentMethodCall` / `AgentEventSend`
/// carrying the target agent id.
#[async_trait]
pub trait AgentReference: Send + Sync {
    fn agent_id(&self) -> &str;

    async fn call_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value>;

    /// Deliver an event; a missing recipient is not an error
    async fn send_event(
        &self,
        event: AgentEvent,
        cancel: Option<CancellationToken>,
    ) -> PluginResult<()>;
}

/// Typed calls for every `AgentReference`, boxed or concrete
#[async_trait]
pub trait AgentReferenceExt: AgentReference {
    /// Call a method and coerce the result to `T`
    async fn call<T: DeserializeOwned>(
        &self,
        method_name: &str,
        params: Vec<Value>,
    ) -> PluginResult<T> {
        let raw = self.call_method(method_name, params).await?;
        coerce_value(raw).map_err(|e| PluginError::method_call(self.agent_id(), method_name, e))
    }
}

impl<R: AgentReference + ?Sized> AgentReferenceExt for R {}

impl std::fmt::Debug for dyn AgentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentReference")
            .field("agent_id", &self.agent_id())
            .finish()
    }
}
