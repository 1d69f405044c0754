//! Plugin Registry
//!
//! Concurrent agent id → plugin instance map. Registration builds the
//! plugin's routing table once; lookups hand out the instance together with
//! its router. The registry never disposes anything.
//!
//! Hosted plugins are registered with a `PluginScheduler`: callers that find
//! them here go through the host's dispatch instead of calling the instance.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use plugin_types::{AgentEvent, AgentPlugin, PluginResult, SchedulingHints};
use serde_json::Value;

use crate::MethodRouter;

/// Dispatch owned by whoever hosts a plugin
#[async_trait]
pub trait PluginScheduler: Send + Sync {
    /// Schedule a call; `hints` replaces the plugin's own hints when set
    async fn schedule_call(
        &self,
        method_name: &str,
        params: Vec<Value>,
        hints: Option<SchedulingHints>,
    ) -> PluginResult<Value>;

    async fn schedule_event(&self, event: AgentEvent) -> PluginResult<()>;
}

/// A registered plugin instance and its routing table
#[derive(Clone)]
pub struct RegisteredPlugin {
    pub plugin: Arc<dyn AgentPlugin>,
    pub router: Arc<MethodRouter>,
    scheduler: Option<Arc<dyn PluginScheduler>>,
}

impl RegisteredPlugin {
    /// Build the router for a plugin instance
    pub fn new(plugin: Arc<dyn AgentPlugin>) -> Self {
        let router = Arc::new(MethodRouter::for_plugin(plugin.as_ref()));
        Self {
            plugin,
            router,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn PluginScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_some()
    }

    /// Call through the scheduler when there is one, else on the instance
    pub async fn call(
        &self,
        method_name: &str,
        params: Vec<Value>,
        hints: Option<SchedulingHints>,
    ) -> PluginResult<Value> {
        match &self.scheduler {
            Some(scheduler) => scheduler.schedule_call(method_name, params, hints).await,
            None => {
                self.router
                    .route_call(self.plugin.as_ref(), method_name, params)
                    .await
            }
        }
    }

    /// Deliver an event through the scheduler when there is one
    pub async fn deliver(&self, event: AgentEvent) -> PluginResult<()> {
        match &self.scheduler {
            Some(scheduler) => scheduler.schedule_event(event).await,
            None => self.plugin.handle_event(event).await,
        }
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("type_name", &self.plugin.type_name())
            .field("methods", &self.router.method_names())
            .field("scheduled", &self.is_scheduled())
            .finish()
    }
}

/// Agent id → plugin instance map
#[derive(Default)]
pub struct PluginRegistry {
    plugins: DashMap<String, RegisteredPlugin>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new registry wrapped in an Arc
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a plugin under an agent id; the last writer wins
    pub fn register(
        &self,
        agent_id: impl Into<String>,
        plugin: Arc<dyn AgentPlugin>,
    ) -> RegisteredPlugin {
        self.insert(agent_id, RegisteredPlugin::new(plugin))
    }

    /// Register a prepared entry; the last writer wins
    pub fn insert(
        &self,
        agent_id: impl Into<String>,
        registered: RegisteredPlugin,
    ) -> RegisteredPlugin {
        let agent_id = agent_id.into();
        if self
            .plugins
            .insert(agent_id.clone(), registered.clone())
            .is_some()
        {
            tracing::debug!(agent_id = %agent_id, "Replaced registered plugin");
        } else {
            tracing::debug!(agent_id = %agent_id, "Registered plugin");
        }
        registered
    }

    pub fn get(&self, agent_id: &str) -> Option<RegisteredPlugin> {
        self.plugins.get(agent_id).map(|entry| entry.value().clone())
    }

    /// Remove a plugin; true iff something was removed
    pub fn unregister(&self, agent_id: &str) -> bool {
        self.plugins.remove(agent_id).is_some()
    }

    pub fn get_all(&self) -> Vec<(String, RegisteredPlugin)> {
        self.plugins
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.plugins.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CounterPlugin, EmptyPlugin};

    #[test]
    fn test_register_then_get_returns_same_instance() {
        let registry = PluginRegistry::new();
        let plugin: Arc<dyn AgentPlugin> = Arc::new(CounterPlugin::default());

        registry.register("agent-1", Arc::clone(&plugin));

        let found = registry.get("agent-1").unwrap();
        assert!(Arc::ptr_eq(&found.plugin, &plugin));
        assert!(found.router.contains("increment"));
    }

    #[test]
    fn test_unregister() {
        let registry = PluginRegistry::new();
        registry.register("agent-1", Arc::new(CounterPlugin::default()));

        assert!(registry.unregister("agent-1"));
        assert!(registry.get("agent-1").is_none());
        assert!(!registry.unregister("agent-1"));
        assert!(!registry.unregister("never-registered"));
    }

    #[test]
    fn test_last_writer_wins() {
        let registry = PluginRegistry::new();
        registry.register("agent-1", Arc::new(CounterPlugin::default()));
        let second: Arc<dyn AgentPlugin> = Arc::new(EmptyPlugin);
        registry.register("agent-1", Arc::clone(&second));

        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get("agent-1").unwrap().plugin, &second));
    }

    #[test]
    fn test_get_all() {
        let registry = PluginRegistry::new();
        registry.register("a", Arc::new(CounterPlugin::default()));
        registry.register("b", Arc::new(EmptyPlugin));

        let mut ids: Vec<_> = registry.get_all().into_iter().map(|(id, _)| id).collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    /// Scheduler answering every call with the hints it was given
    struct EchoScheduler;

    #[async_trait]
    impl PluginScheduler for EchoScheduler {
        async fn schedule_call(
            &self,
            method_name: &str,
            _params: Vec<Value>,
            hints: Option<SchedulingHints>,
        ) -> PluginResult<Value> {
            Ok(serde_json::json!({
                "method": method_name,
                "read_only": hints.map(|h| h.read_only),
            }))
        }

        async fn schedule_event(&self, _event: AgentEvent) -> PluginResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_scheduled_entries_bypass_the_instance() {
        let registry = PluginRegistry::new();
        let direct = registry.register("direct", Arc::new(CounterPlugin::default()));
        let scheduled = registry.insert(
            "scheduled",
            RegisteredPlugin::new(Arc::new(CounterPlugin::default()))
                .with_scheduler(Arc::new(EchoScheduler)),
        );

        assert!(!direct.is_scheduled());
        assert_eq!(direct.call("increment", vec![], None).await.unwrap(), 1);

        assert!(registry.get("scheduled").unwrap().is_scheduled());
        let echoed = scheduled
            .call("increment", vec![], Some(SchedulingHints::read_only()))
            .await
            .unwrap();
        assert_eq!(echoed["method"], "increment");
        assert_eq!(echoed["read_only"], true);

        // Served by the scheduler, so the instance never counted
        let plugin = registry.get("scheduled").unwrap().plugin;
        let current = plugin.execute_method("current", vec![]).await.unwrap();
        assert_eq!(current, 0);
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = PluginRegistry::new_shared();
        let mut tasks = Vec::new();

        for i in 0..16 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let id = format!("agent-{}", i);
                registry.register(id.clone(), Arc::new(CounterPlugin::default()));
                assert!(registry.get(&id).is_some());
                if i % 2 == 0 {
                    assert!(registry.unregister(&id));
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len(), 8);
    }
}
