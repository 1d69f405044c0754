//! Agent Reference
//!
//! Handle one agent uses to reach another. Calls go to the local plugin when
//! the registry knows the id (through its host, when hosted), then to the
//! directory's actor, and fail with the target agent id attached.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use plugin_types::{AgentEvent, AgentReference, CancellationToken, PluginError, PluginResult};
use serde_json::Value;

use crate::{ActorDirectory, PluginRegistry};

#[derive(Clone)]
pub struct RuntimeAgentReference {
    agent_id: String,
    registry: Arc<PluginRegistry>,
    directory: Arc<dyn ActorDirectory>,
}

impl RuntimeAgentReference {
    pub fn new(
        agent_id: impl Into<String>,
        registry: Arc<PluginRegistry>,
        directory: Arc<dyn ActorDirectory>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            registry,
            directory,
        }
    }

    async fn resolve_call(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        if let Some(local) = self.registry.get(&self.agent_id) {
            match local.call(method_name, params.clone(), None).await {
                Err(PluginError::MethodNotFound(_)) => {
                    tracing::debug!(
                        agent_id = %self.agent_id,
                        method = %method_name,
                        "Method not found locally, trying the actor directory"
                    );
                }
                other => return other,
            }
        }

        if let Some(remote) = self.directory.lookup(&self.agent_id) {
            if let Some(callable) = remote.as_method_callable() {
                return callable.call_method(method_name, params).await;
            }
        }

        Err(PluginError::MethodNotFound(method_name.to_string()))
    }

    async fn deliver(&self, event: AgentEvent) -> PluginResult<()> {
        if let Some(local) = self.registry.get(&self.agent_id) {
            return local.deliver(event).await;
        }

        if let Some(remote) = self.directory.lookup(&self.agent_id) {
            if let Some(receiver) = remote.as_event_receiver() {
                return receiver.receive_event(event).await;
            }
        }

        tracing::warn!(
            agent_id = %self.agent_id,
            event_type = %event.event_type,
            "No recipient for event"
        );
        Ok(())
    }
}

#[async_trait]
impl AgentReference for RuntimeAgentReference {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    async fn call_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        self.resolve_call(method_name, params)
            .await
            .map_err(|e| PluginError::method_call(&self.agent_id, method_name, e))
    }

    async fn send_event(
        &self,
        event: AgentEvent,
        cancel: Option<CancellationToken>,
    ) -> PluginResult<()> {
        let event_type = event.event_type.clone();
        let cancel = cancel.unwrap_or_default();

        let result = if cancel.is_cancelled() {
            Err(PluginError::Cancelled)
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(PluginError::Cancelled),
                result = self.deliver(event) => result,
            }
        };

        result.map_err(|e| PluginError::event_send(&self.agent_id, &event_type, e))
    }
}

impl PartialEq for RuntimeAgentReference {
    fn eq(&self, other: &Self) -> bool {
        self.agent_id == other.agent_id
    }
}

impl Eq for RuntimeAgentReference {}

impl Hash for RuntimeAgentReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.agent_id.hash(state);
    }
}

impl std::fmt::Debug for RuntimeAgentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAgentReference")
            .field("agent_id", &self.agent_id)
            .finish()
    }
}
