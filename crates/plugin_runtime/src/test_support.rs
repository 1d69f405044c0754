//! Plugins and fixtures shared by the unit tests

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use plugin_types::{
    AgentContext, AgentEvent, AgentLogger, PLUGIN_ABI_VERSION, PluginError, PluginLifecycle,
    PluginModuleDecl, PluginResult, SDK_VERSION, agent_plugin, async_trait,
};
use serde_json::{Map, Value, json};

use crate::{
    AgentContextBuilder, CorrelationHub, EventBus, LoaderConfig, LocalActorDirectory,
    ModuleBackend, PluginLoader, PluginRegistry, ServiceResolver, StaticModuleBackend, Topology,
};

// ─────────────────────────────────────────────────────────────────────────────
// Counter Plugin
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct CounterPlugin {
    value: AtomicI64,
    bumps: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    fail_dispose: AtomicBool,
    last_event: Mutex<Option<String>>,
    context: Mutex<Option<Arc<dyn AgentContext>>>,
}

impl CounterPlugin {
    async fn tracked(&self, millis: u64) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(millis)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Test counter.
#[agent_plugin(name = "Counter", version = "1.0", capabilities(step = 1))]
impl CounterPlugin {
    #[agent_method(read_only)]
    async fn current(&self) -> PluginResult<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    #[agent_method]
    async fn increment(&self) -> PluginResult<i64> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[agent_method(name = "add")]
    async fn add_amount(&self, amount: i64) -> PluginResult<i64> {
        Ok(self.value.fetch_add(amount, Ordering::SeqCst) + amount)
    }

    #[agent_method(read_only)]
    async fn version(&self) -> PluginResult<String> {
        Ok("1.0".to_string())
    }

    #[agent_method(always_interleave)]
    async fn ping(&self) -> PluginResult<String> {
        Ok("pong".to_string())
    }

    #[agent_method(one_way)]
    async fn bump(&self) -> PluginResult<()> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.bumps.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[agent_method(always_interleave)]
    async fn bumps(&self) -> PluginResult<u64> {
        Ok(self.bumps.load(Ordering::SeqCst))
    }

    #[agent_method]
    async fn fail(&self) -> PluginResult<()> {
        Err(PluginError::execution("counter failure"))
    }

    #[agent_method(read_only)]
    async fn slow_read(&self, millis: u64) -> PluginResult<()> {
        self.tracked(millis).await;
        Ok(())
    }

    #[agent_method]
    async fn slow_write(&self, millis: u64) -> PluginResult<()> {
        self.tracked(millis).await;
        Ok(())
    }

    /// Highest number of slow calls observed running at once
    #[agent_method(always_interleave)]
    async fn max_in_flight(&self) -> PluginResult<usize> {
        Ok(self.max_in_flight.load(Ordering::SeqCst))
    }

    #[agent_method(always_interleave)]
    async fn last_event(&self) -> PluginResult<Option<String>> {
        Ok(self.last_event.lock().clone())
    }

    #[event_handler("Increment")]
    async fn on_increment(&self, by: i64) -> PluginResult<()> {
        self.value.fetch_add(by, Ordering::SeqCst);
        *self.last_event.lock() = Some("Increment".to_string());
        Ok(())
    }

    #[event_handler("Explode")]
    async fn on_explode(&self) -> PluginResult<()> {
        Err(PluginError::execution("exploded"))
    }

    #[event_handler]
    async fn on_any(&self, event: AgentEvent) -> PluginResult<()> {
        *self.last_event.lock() = Some(event.event_type);
        Ok(())
    }
}

#[async_trait]
impl PluginLifecycle for CounterPlugin {
    async fn on_initialize(&self, context: Arc<dyn AgentContext>) -> PluginResult<()> {
        if let Some(start) = context.config::<i64>("start") {
            self.value.store(start, Ordering::SeqCst);
        }
        if let Some(fail) = context.config::<bool>("fail_dispose") {
            self.fail_dispose.store(fail, Ordering::SeqCst);
        }
        *self.context.lock() = Some(context);
        Ok(())
    }

    /// Announces itself, then fails when configured with `fail_dispose`
    async fn on_dispose(&self) -> PluginResult<()> {
        let context = self.context.lock().take();
        if let Some(context) = context {
            context
                .publish_event(AgentEvent::new("CounterDisposed", json!(null)))
                .await?;
        }
        if self.fail_dispose.load(Ordering::SeqCst) {
            return Err(PluginError::execution("dispose failed"));
        }
        Ok(())
    }

    async fn state(&self) -> PluginResult<Option<Value>> {
        Ok(Some(json!({ "value": self.value.load(Ordering::SeqCst) })))
    }

    async fn restore_state(&self, state: Option<Value>) -> PluginResult<()> {
        let value = state
            .as_ref()
            .and_then(|s| s.get("value"))
            .and_then(Value::as_i64)
            .unwrap_or_default();
        self.value.store(value, Ordering::SeqCst);
        Ok(())
    }
}

/// Second version of the counter, same plugin name
#[derive(Default)]
pub struct CounterPluginV2 {
    value: AtomicI64,
}

#[agent_plugin(name = "Counter", version = "2.0")]
impl CounterPluginV2 {
    #[agent_method(read_only)]
    async fn current(&self) -> PluginResult<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }

    #[agent_method]
    async fn increment(&self) -> PluginResult<i64> {
        Ok(self.value.fetch_add(10, Ordering::SeqCst) + 10)
    }

    #[agent_method(read_only)]
    async fn version(&self) -> PluginResult<String> {
        Ok("2.0".to_string())
    }
}

impl PluginLifecycle for CounterPluginV2 {}

/// Plugin without annotated methods
#[derive(Default)]
pub struct EmptyPlugin;

#[agent_plugin(name = "Empty")]
impl EmptyPlugin {}

impl PluginLifecycle for EmptyPlugin {}

// ─────────────────────────────────────────────────────────────────────────────
// Modules
// ─────────────────────────────────────────────────────────────────────────────

pub static COUNTER_MODULE: PluginModuleDecl =
    plugin_types::plugin_module![CounterPlugin => CounterPlugin::default];

pub static COUNTER_V2_MODULE: PluginModuleDecl =
    plugin_types::plugin_module![CounterPluginV2 => CounterPluginV2::default];

pub static MULTI_MODULE: PluginModuleDecl = plugin_types::plugin_module![
    CounterPlugin => CounterPlugin::default,
    EmptyPlugin => EmptyPlugin::default,
];

pub static EMPTY_MODULE: PluginModuleDecl = PluginModuleDecl {
    abi_version: PLUGIN_ABI_VERSION,
    sdk_version: SDK_VERSION,
    exports: &[],
};

pub fn static_backend() -> StaticModuleBackend {
    StaticModuleBackend::new()
        .with_module("counter", &COUNTER_MODULE)
        .with_module("counter-v2", &COUNTER_V2_MODULE)
        .with_module("multi", &MULTI_MODULE)
        .with_module("empty", &EMPTY_MODULE)
}

/// Write `<root>/<name>[/<version>]/<name>.agentmod` selecting `module`
pub fn write_unit(root: &Path, name: &str, version: Option<&str>, module: &str) -> PathBuf {
    let mut dir = root.join(name);
    if let Some(version) = version {
        dir = dir.join(version);
    }
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.{}", name, StaticModuleBackend::EXTENSION));
    std::fs::write(&path, StaticModuleBackend::unit_for(module)).unwrap();
    path
}

pub fn test_loader(plugins_dir: &Path) -> PluginLoader {
    let config = LoaderConfig::new(plugins_dir).with_shadow_dir(plugins_dir.join(".shadow"));
    let backends: Vec<Arc<dyn ModuleBackend>> = vec![Arc::new(static_backend())];
    PluginLoader::new(config, backends)
}

// ─────────────────────────────────────────────────────────────────────────────
// Substrate
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime pieces a context needs, wired together
pub struct TestSubstrate {
    pub bus: Arc<EventBus>,
    pub hub: Arc<CorrelationHub>,
    pub topology: Arc<Topology>,
    pub directory: Arc<LocalActorDirectory>,
    pub services: Arc<ServiceResolver>,
    pub registry: Arc<PluginRegistry>,
}

impl TestSubstrate {
    pub fn new() -> Self {
        let registry = PluginRegistry::new_shared();
        let services = Arc::new(ServiceResolver::new());
        services.provide(Arc::clone(&registry));
        Self {
            bus: Arc::new(EventBus::new(64)),
            hub: Arc::new(CorrelationHub::new()),
            topology: Arc::new(Topology::new()),
            directory: Arc::new(LocalActorDirectory::new()),
            services,
            registry,
        }
    }

    pub fn context(
        &self,
        agent_id: &str,
        config: Option<Map<String, Value>>,
    ) -> Arc<dyn AgentContext> {
        let context = AgentContextBuilder::new()
            .host(agent_id, Arc::clone(&self.bus))
            .logger(AgentLogger::new(agent_id))
            .directory(Arc::clone(&self.directory) as _)
            .services(Arc::clone(&self.services))
            .configuration(config)
            .correlation(Arc::clone(&self.hub))
            .topology(Arc::clone(&self.topology))
            .build()
            .unwrap();
        Arc::new(context)
    }
}
