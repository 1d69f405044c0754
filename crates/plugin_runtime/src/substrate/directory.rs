//! Actor Directory
//!
//! Resolves agent ids to addressable actors. An actor may accept method
//! calls, events, both or neither; callers check for the capabilities they need.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use plugin_types::{AgentEvent, PluginResult};
use serde_json::Value;

/// Capability of accepting routed method calls
#[async_trait]
pub trait MethodCallable: Send + Sync {
    async fn call_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value>;
}

/// Capability of accepting events
#[async_trait]
pub trait EventReceiver: Send + Sync {
    async fn receive_event(&self, event: AgentEvent) -> PluginResult<()>;
}

/// An addressable actor
pub trait RemoteAgent: Send + Sync {
    fn agent_id(&self) -> &str;

    fn as_method_callable(&self) -> Option<&dyn MethodCallable> {
        None
    }

    fn as_event_receiver(&self) -> Option<&dyn EventReceiver> {
        None
    }
}

pub trait ActorDirectory: Send + Sync {
    fn lookup(&self, agent_id: &str) -> Option<Arc<dyn RemoteAgent>>;
}

/// In-process directory
#[derive(Default)]
pub struct LocalActorDirectory {
    actors: DashMap<String, Arc<dyn RemoteAgent>>,
}

impl LocalActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an actor under its own agent id; the last writer wins
    pub fn register(&self, actor: Arc<dyn RemoteAgent>) {
        let agent_id = actor.agent_id().to_string();
        tracing::debug!(agent_id = %agent_id, "Actor registered in directory");
        self.actors.insert(agent_id, actor);
    }

    pub fn remove(&self, agent_id: &str) -> bool {
        self.actors.remove(agent_id).is_some()
    }

    /// Sorted ids of every registered actor
    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.actors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl ActorDirectory for LocalActorDirectory {
    fn lookup(&self, agent_id: &str) -> Option<Arc<dyn RemoteAgent>> {
        self.actors.get(agent_id).map(|e| Arc::clone(e.value()))
    }
}

impl std::fmt::Debug for LocalActorDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalActorDirectory")
            .field("actors", &self.agent_ids())
            .finish()
    }
}
