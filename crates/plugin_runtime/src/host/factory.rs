//! Host Factory
//!
//! Creates plugin hosts over one shared environment and keeps track of the
//! live ones. Every activated host is also published in the actor directory,
//! so agent references reach hosts that have not loaded their plugin yet.

use std::sync::Arc;

use dashmap::DashMap;
use plugin_types::{ActorInterface, PluginError, PluginResult};
use serde_json::{Map, Value};

use super::{HostEnvironment, PluginHost, PluginHostHandle};
use crate::{
    ActorDirectory, AdapterGenerator, HostConfig, HostJournal, InterfaceAdapter, PluginLoader,
    RuntimeAgentReference,
};

pub struct PluginHostFactory {
    env: HostEnvironment,
    hosts: DashMap<String, PluginHostHandle>,
    /// One activation at a time per host id
    activations: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    adapters: AdapterGenerator,
}

impl PluginHostFactory {
    pub fn new(
        loader: Arc<PluginLoader>,
        journal: Arc<dyn HostJournal>,
        config: HostConfig,
    ) -> Self {
        Self::with_environment(HostEnvironment::new(loader, journal, config))
    }

    pub fn with_environment(env: HostEnvironment) -> Self {
        Self {
            env,
            hosts: DashMap::new(),
            activations: DashMap::new(),
            adapters: AdapterGenerator::default(),
        }
    }

    pub fn environment(&self) -> &HostEnvironment {
        &self.env
    }

    /// Live handle for a host id, activating the host from its journal if needed
    pub async fn activate(&self, host_id: &str) -> PluginResult<PluginHostHandle> {
        if let Some(handle) = self.host(host_id) {
            return Ok(handle);
        }

        let lock = Arc::clone(self.activations.entry(host_id.to_string()).or_default().value());
        let _guard = lock.lock().await;
        // Another caller may have finished activating while we waited
        if let Some(handle) = self.host(host_id) {
            return Ok(handle);
        }

        let handle = PluginHost::activate(host_id, self.env.clone()).await?;
        self.env.directory.register(Arc::new(handle.clone()));
        self.hosts.insert(host_id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Activate a host and configure it with a plugin
    pub async fn create(
        &self,
        host_id: &str,
        plugin_name: &str,
        plugin_version: Option<&str>,
        configuration: Option<Map<String, Value>>,
    ) -> PluginResult<PluginHostHandle> {
        let handle = self.activate(host_id).await?;
        handle
            .initialize_configuration(plugin_name, plugin_version, configuration)
            .await?;
        Ok(handle)
    }

    /// Live host by id; disposed hosts are forgotten
    pub fn host(&self, host_id: &str) -> Option<PluginHostHandle> {
        let handle = self.hosts.get(host_id)?.value().clone();
        if handle.is_disposed() {
            self.hosts.remove(host_id);
            return None;
        }
        Some(handle)
    }

    pub fn host_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .hosts
            .iter()
            .filter(|entry| !entry.value().is_disposed())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Reference to any agent, hosted here or not
    pub fn reference(&self, agent_id: &str) -> RuntimeAgentReference {
        RuntimeAgentReference::new(
            agent_id,
            Arc::clone(&self.env.registry),
            Arc::clone(&self.env.directory) as Arc<dyn ActorDirectory>,
        )
    }

    /// Expose the plugin loaded under `agent_id` as the interface `I`
    pub fn adapter<I>(&self, agent_id: &str) -> PluginResult<InterfaceAdapter<I>>
    where
        I: ActorInterface + ?Sized,
    {
        let plugin = self.env.registry.get(agent_id).ok_or_else(|| {
            PluginError::InvalidOperation(format!("Agent {} has no loaded plugin", agent_id))
        })?;
        self.adapters.create_adapter::<I>(&plugin)
    }

    /// Dispose every live host, logging failures
    pub async fn dispose_all(&self) {
        let handles: Vec<_> = self
            .hosts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.hosts.clear();

        for handle in handles {
            if handle.is_disposed() {
                continue;
            }
            if let Err(e) = handle.dispose().await {
                tracing::warn!(host_id = %handle.host_id(), error = %e, "Failed to dispose host");
            }
        }
    }
}

impl std::fmt::Debug for PluginHostFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHostFactory")
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use crate::test_support::{test_loader, write_unit};
    use crate::{DEFAULT_DESCRIPTION, HostLogEntry, HostPhase, InMemoryJournal};
    use async_trait::async_trait;
    use plugin_types::{AgentEvent, AgentReference, AgentReferenceExt, agent_interface};
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    /// In-memory journal that can refuse appends or stall replays
    #[derive(Default)]
    struct TestJournal {
        inner: InMemoryJournal,
        fail_appends: AtomicBool,
        slow_replay: AtomicBool,
    }

    #[async_trait]
    impl HostJournal for TestJournal {
        async fn append(&self, host_id: &str, entry: &HostLogEntry) -> PluginResult<()> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(PluginError::Journal("disk full".into()));
            }
            self.inner.append(host_id, entry).await
        }

        async fn replay(&self, host_id: &str) -> PluginResult<Vec<HostLogEntry>> {
            if self.slow_replay.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            self.inner.replay(host_id).await
        }
    }

    fn plugins_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        write_unit(dir.path(), "Counter", Some("1.0"), "counter");
        write_unit(dir.path(), "Counter", Some("2.0"), "counter-v2");
        dir
    }

    fn factory_over(dir: &TempDir, journal: Arc<dyn HostJournal>) -> PluginHostFactory {
        let loader = Arc::new(test_loader(dir.path()));
        PluginHostFactory::new(loader, journal, HostConfig::default())
    }

    fn factory() -> (TempDir, PluginHostFactory) {
        let dir = plugins_dir();
        let factory = factory_over(&dir, Arc::new(InMemoryJournal::new()));
        (dir, factory)
    }

    fn config(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    /// Poll a method until it returns `expected`
    async fn eventually(host: &PluginHostHandle, method: &str, expected: Value) -> bool {
        for _ in 0..50 {
            if host.call_method(method, vec![]).await.unwrap() == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_plugin_loads_on_first_call() {
        let (_dir, factory) = factory();
        let host = factory
            .create("h1", "Counter", Some("1.0"), config(json!({"start": 5})))
            .await
            .unwrap();

        assert_eq!(host.phase(), HostPhase::Configured);
        assert!(!factory.environment().registry.contains("h1"));

        assert_eq!(host.call_method("increment", vec![]).await.unwrap(), 6);
        assert_eq!(host.phase(), HostPhase::Loaded);
        assert!(factory.environment().registry.contains("h1"));
    }

    #[tokio::test]
    async fn test_unconfigured_host() {
        let (_dir, factory) = factory();
        let host = factory.activate("h0").await.unwrap();

        assert_eq!(host.phase(), HostPhase::Unconfigured);
        assert_eq!(host.get_state().await.unwrap(), None);
        assert_eq!(host.get_metadata().await.unwrap(), None);
        assert_eq!(host.get_description().await.unwrap(), DEFAULT_DESCRIPTION);

        let err = host.call_method("current", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidOperation(_)));
        let err = host.set_state(Some(json!(1))).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidOperation(_)));
        assert_err!(host.reload().await);
    }

    #[tokio::test]
    async fn test_metadata_and_description_load_the_plugin() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();

        let descriptor = host.get_metadata().await.unwrap().unwrap();
        assert_eq!(descriptor.key(), "Counter:1.0");
        assert_eq!(host.phase(), HostPhase::Loaded);
        assert_eq!(host.get_description().await.unwrap(), "Test counter.");
    }

    #[tokio::test]
    async fn test_missing_plugin_fails_the_call() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Nope", None, None).await.unwrap();

        let err = host.call_method("current", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::Load { .. }));
        assert_eq!(host.phase(), HostPhase::Configured);
    }

    #[tokio::test]
    async fn test_state_survives_reactivation() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();

        // Not loaded yet
        assert!(host.set_state(Some(json!({"value": 1}))).await.is_err());

        host.call_method("current", vec![]).await.unwrap();
        host.set_state(Some(json!({"value": 42}))).await.unwrap();
        assert_eq!(host.get_state().await.unwrap(), Some(json!({"value": 42})));
        host.dispose().await.unwrap();

        let revived = factory.activate("h1").await.unwrap();
        assert_eq!(revived.phase(), HostPhase::Configured);
        assert_eq!(revived.call_method("current", vec![]).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_recreating_a_host_keeps_its_state() {
        let dir = plugins_dir();
        let journal = Arc::new(InMemoryJournal::new());

        let first = factory_over(&dir, journal.clone());
        let host = first.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();
        host.set_state(Some(json!({"value": 42}))).await.unwrap();
        host.dispose().await.unwrap();
        let recorded = journal.len("h1");

        // Same arguments after a restart
        let second = factory_over(&dir, journal.clone());
        let host = second.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        assert_eq!(journal.len("h1"), recorded);
        assert_eq!(host.call_method("current", vec![]).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrent_activations_share_one_host() {
        let dir = plugins_dir();
        let journal = Arc::new(TestJournal::default());
        journal.slow_replay.store(true, Ordering::SeqCst);
        let factory = factory_over(&dir, journal);

        let (a, b) = tokio::join!(factory.activate("h"), factory.activate("h"));
        let (a, b) = (a.unwrap(), b.unwrap());

        a.initialize_configuration("Counter", Some("1.0"), None)
            .await
            .unwrap();
        assert_eq!(b.phase(), HostPhase::Configured);
        assert_eq!(factory.host_ids(), vec!["h"]);

        a.dispose().await.unwrap();
        assert!(b.is_disposed());
    }

    #[tokio::test]
    async fn test_failed_load_record_leaves_nothing_registered() {
        let dir = plugins_dir();
        let journal = Arc::new(TestJournal::default());
        let factory = factory_over(&dir, journal.clone());
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();

        journal.fail_appends.store(true, Ordering::SeqCst);
        let err = host.call_method("current", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::Journal(_)));
        assert!(!factory.environment().registry.contains("h1"));
        assert_eq!(factory.environment().loader.context_count(), 0);
        assert_eq!(host.phase(), HostPhase::Configured);

        journal.fail_appends.store(false, Ordering::SeqCst);
        assert_eq!(host.call_method("current", vec![]).await.unwrap(), 0);
        assert!(factory.environment().registry.contains("h1"));
    }

    #[tokio::test]
    async fn test_dropped_host_deactivates() {
        let dir = plugins_dir();
        let env = HostEnvironment::new(
            Arc::new(test_loader(dir.path())),
            Arc::new(InMemoryJournal::new()),
            HostConfig::default(),
        );
        let host = PluginHost::activate("solo", env.clone()).await.unwrap();
        host.initialize_configuration("Counter", Some("1.0"), None)
            .await
            .unwrap();
        host.call_method("current", vec![]).await.unwrap();
        assert!(env.registry.contains("solo"));

        drop(host);
        let mut released = false;
        for _ in 0..50 {
            if !env.registry.contains("solo") && env.loader.context_count() == 0 {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released);
    }

    #[tokio::test]
    async fn test_dispose_releases_only_its_own_load() {
        let (_dir, factory) = factory();
        let h1 = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        let h2 = factory.create("h2", "Counter", Some("1.0"), None).await.unwrap();
        h1.call_method("current", vec![]).await.unwrap();
        h2.call_method("current", vec![]).await.unwrap();

        let loader = &factory.environment().loader;
        assert_eq!(loader.context_count(), 2);

        h1.dispose().await.unwrap();
        assert_eq!(loader.context_count(), 1);
        assert_eq!(h2.call_method("increment", vec![]).await.unwrap(), 1);

        h2.dispose().await.unwrap();
        assert_eq!(loader.context_count(), 0);
    }

    #[tokio::test]
    async fn test_reload_picks_up_new_configuration() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        assert_eq!(host.call_method("version", vec![]).await.unwrap(), "1.0");

        host.initialize_configuration("Counter", Some("2.0"), None)
            .await
            .unwrap();
        // Still the old instance until reload
        assert_eq!(host.call_method("version", vec![]).await.unwrap(), "1.0");

        host.reload().await.unwrap();
        assert_eq!(host.phase(), HostPhase::Loaded);
        assert_eq!(host.call_method("version", vec![]).await.unwrap(), "2.0");
        assert_eq!(host.call_method("increment", vec![]).await.unwrap(), 10);

        let descriptor = host.get_metadata().await.unwrap().unwrap();
        assert_eq!(descriptor.key(), "Counter:2.0");
        assert_eq!(host.get_description().await.unwrap(), "Counter:2.0");
    }

    #[tokio::test]
    async fn test_reload_restores_journaled_state() {
        let (_dir, factory) = factory();
        let host = factory
            .create("h1", "Counter", Some("1.0"), config(json!({"start": 1})))
            .await
            .unwrap();
        host.call_method("current", vec![]).await.unwrap();
        host.set_state(Some(json!({"value": 7}))).await.unwrap();

        host.reload().await.unwrap();
        assert_eq!(host.call_method("current", vec![]).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_reload_survives_failing_dispose() {
        let (_dir, factory) = factory();
        let host = factory
            .create("h1", "Counter", Some("1.0"), config(json!({"fail_dispose": true})))
            .await
            .unwrap();
        host.call_method("current", vec![]).await.unwrap();

        let env = factory.environment();
        let before = env.registry.get("h1").unwrap();
        let mut events = env.bus.subscribe();

        host.reload().await.unwrap();
        assert_eq!(host.phase(), HostPhase::Loaded);

        // The old instance was asked to dispose and replaced
        let envelope = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.publisher, "h1");
        assert_eq!(envelope.event.event_type, "CounterDisposed");
        let after = env.registry.get("h1").unwrap();
        assert!(!Arc::ptr_eq(&before.plugin, &after.plugin));

        host.dispose().await.unwrap();
        assert!(!env.registry.contains("h1"));
    }

    #[tokio::test]
    async fn test_read_only_calls_overlap() {
        let (_dir, factory) = factory();
        let host = factory.create("r", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        let (a, b) = tokio::join!(
            host.call_method("slow_read", vec![json!(100)]),
            host.call_method("slow_read", vec![json!(100)]),
        );
        a.unwrap();
        b.unwrap();
        assert_eq!(host.call_method("max_in_flight", vec![]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_mutating_calls_are_exclusive() {
        let (_dir, factory) = factory();
        let host = factory.create("w", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        let (a, b, c) = tokio::join!(
            host.call_method("slow_write", vec![json!(50)]),
            host.call_method("slow_read", vec![json!(50)]),
            host.call_method("slow_write", vec![json!(50)]),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(host.call_method("max_in_flight", vec![]).await.unwrap(), 1);
    }

    #[agent_interface]
    pub trait Writer: Send + Sync {
        async fn slow_write(&self, millis: u64) -> PluginResult<()>;
    }

    #[agent_interface]
    pub trait RelaxedWriter: Send + Sync {
        #[read_only]
        async fn slow_write(&self, millis: u64) -> PluginResult<()>;
    }

    #[tokio::test]
    async fn test_every_path_shares_the_exclusive_lane() {
        let (_dir, factory) = factory();
        let host = factory.create("w", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        let writer = factory.adapter::<dyn Writer>("w").unwrap();
        let reference = factory.reference("w");
        let (a, b, c) = tokio::join!(
            host.call_method("slow_write", vec![json!(50)]),
            writer.slow_write(50),
            reference.call_method("slow_write", vec![json!(50)]),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();
        assert_eq!(host.call_method("max_in_flight", vec![]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_interface_hints_reach_the_host() {
        let (_dir, factory) = factory();
        let host = factory.create("w", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        let writer = factory.adapter::<dyn RelaxedWriter>("w").unwrap();
        assert!(writer.scheduling_hints("slow_write").read_only);

        let (a, b) = tokio::join!(writer.slow_write(100), writer.slow_write(100));
        a.unwrap();
        b.unwrap();
        assert_eq!(host.call_method("max_in_flight", vec![]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_one_way_call_is_acknowledged_first() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        assert_eq!(host.call_method("bump", vec![]).await.unwrap(), Value::Null);
        assert_eq!(host.call_method("bumps", vec![]).await.unwrap(), 0);

        assert!(eventually(&host, "bumps", json!(1)).await);
    }

    #[tokio::test]
    async fn test_handle_event() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();

        host.handle_event(AgentEvent::new("Increment", json!(3)))
            .await
            .unwrap();
        assert_eq!(host.call_method("current", vec![]).await.unwrap(), 3);

        let err = host
            .handle_event(AgentEvent::new("Explode", json!(null)))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Execution(_)));
    }

    #[tokio::test]
    async fn test_subscribed_events_are_delivered() {
        let (_dir, factory) = factory();
        let a = factory.create("a", "Counter", Some("1.0"), None).await.unwrap();
        a.call_method("current", vec![]).await.unwrap();

        let env = factory.environment();
        env.topology.subscribe("a", &["b".to_string()]);

        env.bus.publish("b", AgentEvent::new("Ping", json!(null)));
        assert!(eventually(&a, "last_event", json!("Ping")).await);

        // Not subscribed to c
        env.bus.publish("c", AgentEvent::new("Other", json!(null)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.call_method("last_event", vec![]).await.unwrap(), "Ping");
    }

    #[tokio::test]
    async fn test_dispose_stops_the_host() {
        let (_dir, factory) = factory();
        let host = factory.create("h1", "Counter", Some("1.0"), None).await.unwrap();
        host.call_method("current", vec![]).await.unwrap();

        assert_ok!(host.dispose().await);
        assert_eq!(host.phase(), HostPhase::Disposed);

        let env = factory.environment();
        assert!(!env.registry.contains("h1"));
        assert!(env.directory.lookup("h1").is_none());
        assert!(factory.host("h1").is_none());

        let err = host.call_method("current", vec![]).await.unwrap_err();
        assert!(matches!(err, PluginError::InvalidOperation(_)));
        assert_err!(host.dispose().await);
    }

    #[tokio::test]
    async fn test_reference_reaches_unloaded_host() {
        let (_dir, factory) = factory();
        factory
            .create("h1", "Counter", Some("1.0"), config(json!({"start": 2})))
            .await
            .unwrap();

        // Goes through the directory, loading the plugin
        let counter = factory.reference("h1");
        let value: i64 = counter.call("current", vec![]).await.unwrap();
        assert_eq!(value, 2);

        // Now served from the registry
        assert!(factory.environment().registry.contains("h1"));
        counter.call_method("add", vec![json!(3)]).await.unwrap();
        let value: i64 = counter.call("current", vec![]).await.unwrap();
        assert_eq!(value, 5);
    }

    #[agent_interface]
    pub trait Reader: Send + Sync {
        #[read_only]
        async fn current(&self) -> PluginResult<i64>;
    }

    #[tokio::test]
    async fn test_adapter_over_hosted_plugin() {
        let (_dir, factory) = factory();
        let host = factory
            .create("h1", "Counter", Some("1.0"), config(json!({"start": 9})))
            .await
            .unwrap();

        assert!(factory.adapter::<dyn Reader>("h1").is_err());
        host.call_method("current", vec![]).await.unwrap();

        let reader = factory.adapter::<dyn Reader>("h1").unwrap();
        assert_eq!(reader.current().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_dispose_all() {
        let (_dir, factory) = factory();
        let a = factory.create("a", "Counter", Some("1.0"), None).await.unwrap();
        factory.activate("b").await.unwrap();
        assert_eq!(factory.host_ids(), vec!["a", "b"]);

        factory.dispose_all().await;
        assert!(a.is_disposed());
        assert!(factory.host_ids().is_empty());
    }
}
