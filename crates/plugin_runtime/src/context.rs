//! Agent Context
//!
//! The capability bundle a hosted plugin receives at initialization. It is
//! assembled by `AgentContextBuilder` from the host's handles into the
//! substrate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use plugin_types::{
    AgentContext, AgentEvent, AgentLogger, AgentReference, DEFAULT_RESPONSE_TIMEOUT, PluginError,
    PluginResult,
};
use serde_json::{Map, Value};

use crate::{
    ActorDirectory, CorrelationHub, EventBus, PluginRegistry, RuntimeAgentReference,
    ServiceResolver, Topology,
};

/// The hosting agent as seen by its context
#[derive(Clone)]
struct HostBinding {
    agent_id: String,
    bus: Arc<EventBus>,
}

pub struct HostAgentContext {
    host: HostBinding,
    logger: AgentLogger,
    directory: Arc<dyn ActorDirectory>,
    services: Arc<ServiceResolver>,
    configuration: Map<String, Value>,
    correlation: Option<Arc<CorrelationHub>>,
    topology: Arc<Topology>,
    response_timeout: Duration,
}

impl HostAgentContext {
    pub fn builder() -> AgentContextBuilder {
        AgentContextBuilder::new()
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }
}

impl std::fmt::Debug for HostAgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAgentContext")
            .field("agent_id", &self.host.agent_id)
            .field("configuration", &self.configuration)
            .field("correlation", &self.correlation.is_some())
            .finish()
    }
}

#[async_trait]
impl AgentContext for HostAgentContext {
    fn agent_id(&self) -> &str {
        &self.host.agent_id
    }

    fn logger(&self) -> &AgentLogger {
        &self.logger
    }

    fn configuration(&self) -> &Map<String, Value> {
        &self.configuration
    }

    async fn publish_event(&self, event: AgentEvent) -> PluginResult<()> {
        let event = if event.source_agent_id.is_none() {
            event.with_source(self.host.agent_id.clone())
        } else {
            event
        };
        self.host.bus.publish(self.host.agent_id.clone(), event);
        Ok(())
    }

    async fn publish_event_with_response(
        &self,
        event: AgentEvent,
        timeout: Option<Duration>,
    ) -> PluginResult<Value> {
        let hub = self.correlation.as_ref().ok_or_else(|| {
            PluginError::NotSupported("correlated responses need a correlation hub".into())
        })?;

        let correlation_id = event
            .correlation_id
            .clone()
            .unwrap_or_else(CorrelationHub::next_id);
        let event = event.with_correlation_id(correlation_id.clone());
        let waiter = hub.register(correlation_id.clone());

        self.publish_event(event).await?;

        let timeout = timeout.unwrap_or(self.response_timeout);
        match tokio::time::timeout(timeout, waiter).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(PluginError::Cancelled),
            Err(_) => {
                hub.cancel(&correlation_id);
                tracing::debug!(
                    agent_id = %self.host.agent_id,
                    correlation_id = %correlation_id,
                    "Correlated response timed out"
                );
                Err(PluginError::Timeout(timeout))
            }
        }
    }

    async fn get_agent(&self, agent_id: &str) -> PluginResult<Arc<dyn AgentReference>> {
        let registry = self.services.resolve::<PluginRegistry>().ok_or_else(|| {
            PluginError::InvalidOperation("no plugin registry available".into())
        })?;

        Ok(Arc::new(RuntimeAgentReference::new(
            agent_id,
            registry,
            Arc::clone(&self.directory),
        )))
    }

    async fn register_agents(&self, agent_ids: &[String]) -> PluginResult<()> {
        self.topology.register_children(&self.host.agent_id, agent_ids);
        tracing::debug!(
            agent_id = %self.host.agent_id,
            count = agent_ids.len(),
            "Registered agents"
        );
        Ok(())
    }

    async fn subscribe_to_agents(&self, agent_ids: &[String]) -> PluginResult<()> {
        self.topology.subscribe(&self.host.agent_id, agent_ids);
        tracing::debug!(
            agent_id = %self.host.agent_id,
            count = agent_ids.len(),
            "Subscribed to agents"
        );
        Ok(())
    }

    async fn respond(&self, correlation_id: &str, response: Value) -> PluginResult<()> {
        let hub = self.correlation.as_ref().ok_or_else(|| {
            PluginError::NotSupported("correlated responses need a correlation hub".into())
        })?;
        hub.respond(correlation_id, response);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct AgentContextBuilder {
    host: Option<HostBinding>,
    logger: Option<AgentLogger>,
    directory: Option<Arc<dyn ActorDirectory>>,
    services: Option<Arc<ServiceResolver>>,
    configuration: Option<Map<String, Value>>,
    correlation: Option<Arc<CorrelationHub>>,
    topology: Option<Arc<Topology>>,
    response_timeout: Option<Duration>,
}

impl AgentContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The hosting agent and the stream it publishes on
    pub fn host(mut self, agent_id: impl Into<String>, bus: Arc<EventBus>) -> Self {
        self.host = Some(HostBinding {
            agent_id: agent_id.into(),
            bus,
        });
        self
    }

    pub fn logger(mut self, logger: AgentLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Channel used to reach other hosts
    pub fn directory(mut self, directory: Arc<dyn ActorDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Where shared services such as the plugin registry are resolved
    pub fn services(mut self, services: Arc<ServiceResolver>) -> Self {
        self.services = Some(services);
        self
    }

    pub fn configuration(mut self, configuration: Option<Map<String, Value>>) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn correlation(mut self, hub: Arc<CorrelationHub>) -> Self {
        self.correlation = Some(hub);
        self
    }

    pub fn topology(mut self, topology: Arc<Topology>) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = Some(timeout);
        self
    }

    pub fn build(self) -> PluginResult<HostAgentContext> {
        let host = self.host.ok_or(PluginError::ArgumentNull("host"))?;
        let logger = self.logger.ok_or(PluginError::ArgumentNull("logger"))?;
        let directory = self
            .directory
            .ok_or(PluginError::ArgumentNull("host_call_channel"))?;
        let services = self
            .services
            .ok_or(PluginError::ArgumentNull("dependency_resolver"))?;

        Ok(HostAgentContext {
            host,
            logger,
            directory,
            services,
            configuration: self.configuration.unwrap_or_default(),
            correlation: self.correlation,
            topology: self.topology.unwrap_or_default(),
            response_timeout: self.response_timeout.unwrap_or(DEFAULT_RESPONSE_TIMEOUT),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalActorDirectory;
    use crate::test_support::{CounterPlugin, TestSubstrate};
    use serde_json::json;

    fn complete(substrate: &TestSubstrate) -> AgentContextBuilder {
        AgentContextBuilder::new()
            .host("agent-1", Arc::clone(&substrate.bus))
            .logger(AgentLogger::new("agent-1"))
            .directory(Arc::clone(&substrate.directory) as _)
            .services(Arc::clone(&substrate.services))
    }

    #[test]
    fn test_build_reports_missing_parts() {
        let substrate = TestSubstrate::new();

        let err = AgentContextBuilder::new().build().unwrap_err();
        assert!(matches!(err, PluginError::ArgumentNull("host")));

        let err = AgentContextBuilder::new()
            .host("a", Arc::clone(&substrate.bus))
            .build()
            .unwrap_err();
        assert!(matches!(err, PluginError::ArgumentNull("logger")));

        let err = AgentContextBuilder::new()
            .host("a", Arc::clone(&substrate.bus))
            .logger(AgentLogger::new("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PluginError::ArgumentNull("host_call_channel")));

        let err = AgentContextBuilder::new()
            .host("a", Arc::clone(&substrate.bus))
            .logger(AgentLogger::new("a"))
            .directory(Arc::new(LocalActorDirectory::new()))
            .build()
            .unwrap_err();
        assert!(matches!(err, PluginError::ArgumentNull("dependency_resolver")));
    }

    #[test]
    fn test_missing_configuration_is_empty() {
        let substrate = TestSubstrate::new();
        let context = complete(&substrate).build().unwrap();
        assert!(context.configuration().is_empty());
    }

    #[tokio::test]
    async fn test_publish_event_tags_source() {
        let substrate = TestSubstrate::new();
        let mut rx = substrate.bus.subscribe();
        let context = complete(&substrate).build().unwrap();

        context
            .publish_event(AgentEvent::new("Tick", json!(1)))
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.publisher, "agent-1");
        assert_eq!(envelope.event.source_agent_id.as_deref(), Some("agent-1"));
    }

    #[tokio::test]
    async fn test_publish_with_response_needs_hub() {
        let substrate = TestSubstrate::new();
        let context = complete(&substrate).build().unwrap();

        let err = context
            .publish_event_with_response(AgentEvent::new("Ask", json!(null)), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotSupported(_)));
    }

    #[tokio::test]
    async fn test_publish_with_response_times_out() {
        let substrate = TestSubstrate::new();
        let context = complete(&substrate)
            .correlation(Arc::clone(&substrate.hub))
            .build()
            .unwrap();

        let err = context
            .publish_event_with_response(
                AgentEvent::new("Ask", json!(null)),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Timeout(_)));
        assert_eq!(substrate.hub.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_response_receives_answer() {
        let substrate = TestSubstrate::new();
        let mut rx = substrate.bus.subscribe();
        let context: Arc<dyn AgentContext> = Arc::new(
            complete(&substrate)
                .correlation(Arc::clone(&substrate.hub))
                .build()
                .unwrap(),
        );

        let responder = substrate.context("responder", None);
        tokio::spawn(async move {
            let envelope = rx.recv().await.unwrap();
            let id = envelope.event.correlation_id.unwrap();
            responder.respond(&id, json!({"answer": 42})).await.unwrap();
        });

        #[derive(serde::Deserialize)]
        struct Answer {
            answer: i64,
        }

        let answer: Answer = context
            .publish_with_response(AgentEvent::new("Ask", json!(null)), None)
            .await
            .unwrap();
        assert_eq!(answer.answer, 42);
    }

    #[tokio::test]
    async fn test_get_agent_accepts_any_id() {
        let substrate = TestSubstrate::new();
        substrate
            .registry
            .register("counter", Arc::new(CounterPlugin::default()));
        let context = substrate.context("agent-1", None);

        let reference = context.get_agent("counter").await.unwrap();
        assert_eq!(reference.agent_id(), "counter");
        assert_eq!(reference.call_method("increment", vec![]).await.unwrap(), 1);

        let blank = context.get_agent("   ").await.unwrap();
        assert_eq!(blank.agent_id(), "   ");
    }

    #[tokio::test]
    async fn test_get_agent_without_registry() {
        let substrate = TestSubstrate::new();
        let context = complete(&substrate)
            .services(Arc::new(ServiceResolver::new()))
            .build()
            .unwrap();

        let err = context.get_agent("x").await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidOperation(_)));
    }

    #[tokio::test]
    async fn test_register_and_subscribe_are_idempotent() {
        let substrate = TestSubstrate::new();
        let context = complete(&substrate)
            .topology(Arc::clone(&substrate.topology))
            .build()
            .unwrap();
        let ids = vec!["a".to_string(), "a".to_string(), String::new()];

        context.register_agents(&ids).await.unwrap();
        context.subscribe_to_agents(&ids).await.unwrap();
        context.subscribe_to_agents(&ids).await.unwrap();

        assert_eq!(substrate.topology.children("agent-1"), vec!["", "a"]);
        assert!(substrate.topology.is_subscribed("agent-1", "a"));
        assert_eq!(substrate.topology.subscriptions("agent-1").len(), 2);
    }

    #[test]
    fn test_config_helpers() {
        let substrate = TestSubstrate::new();
        let config = json!({"unit": "celsius", "start": 3}).as_object().cloned();
        let context = substrate.context("agent-1", config);

        assert_eq!(context.config_str("unit"), Some("celsius"));
        assert_eq!(context.config::<i64>("start"), Some(3));
        assert_eq!(context.config::<i64>("missing"), None);
    }
}
