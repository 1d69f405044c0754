//! Interface Adapter Generator
//!
//! Projects a registered plugin onto a target actor interface (a trait
//! annotated with `#[agent_interface]`). The interface is checked against the
//! plugin's routing table once per (plugin type, interface) pair; the
//! resulting `AdapterPlan` is cached and shared by every adapter built from
//! it.
//!
//! Two strategies exist:
//! - `CodeSynthesis`: scheduling hints come from the interface and one-way
//!   methods are fire-and-forget
//! - `InterceptionProxy`: every call is forwarded and awaited; all methods
//!   report default hints

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use plugin_types::{
    ActorInterface, InterfaceDescriptor, MethodTarget, PluginError, PluginResult,
    SchedulingHints, ValueKind,
};
use serde_json::Value;

use crate::RegisteredPlugin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterStrategy {
    #[default]
    CodeSynthesis,
    InterceptionProxy,
}

// ─────────────────────────────────────────────────────────────────────────────
// Adapter Plan
// ─────────────────────────────────────────────────────────────────────────────

/// Validated dispatch table of one interface over one plugin type
#[derive(Debug)]
pub struct AdapterPlan {
    pub plugin_type: &'static str,
    pub strategy: AdapterStrategy,
    pub interface: InterfaceDescriptor,
    /// Routing name → hints declared on the interface
    hints: HashMap<String, SchedulingHints>,
}

impl AdapterPlan {
    /// Check an interface against a plugin's routing table
    fn build(
        plugin: &RegisteredPlugin,
        interface: InterfaceDescriptor,
        strategy: AdapterStrategy,
    ) -> PluginResult<Self> {
        if interface.methods.is_empty() {
            return Err(PluginError::ProxyGeneration {
                interface: interface.name.clone(),
                reason: "interface declares no methods".into(),
            });
        }

        let mut seen = HashSet::new();
        for method in &interface.methods {
            if !seen.insert(method.name.as_str()) {
                return Err(PluginError::ProxyGeneration {
                    interface: interface.name.clone(),
                    reason: format!("more than one method routes to `{}`", method.name),
                });
            }
        }

        let plugin_type = plugin.plugin.type_name();
        let mut hints = HashMap::new();

        for method in &interface.methods {
            let method_error = |reason: String| PluginError::MethodGeneration {
                interface: interface.name.clone(),
                method: method.rust_name.clone(),
                reason,
            };

            let route = plugin
                .router
                .get_routing_info(&method.name)
                .ok_or_else(|| {
                    method_error(format!("{} has no method `{}`", plugin_type, method.name))
                })?;

            if route.parameter_types.len() != method.parameter_types.len() {
                return Err(method_error(format!(
                    "expects {} parameter(s), plugin method `{}` takes {}",
                    method.parameter_types.len(),
                    route.method_name,
                    route.parameter_types.len()
                )));
            }

            if method.hints.one_way && method.return_type.kind != ValueKind::Unit {
                return Err(method_error(format!(
                    "one-way methods must return (), found {}",
                    method.return_type.name
                )));
            }

            if route.hints() != method.hints {
                tracing::debug!(
                    interface = %interface.name,
                    method = %method.name,
                    plugin_hints = ?route.hints(),
                    interface_hints = ?method.hints,
                    "Interface hints override plugin hints"
                );
            }

            hints.insert(method.name.clone(), method.hints);
        }

        Ok(Self {
            plugin_type,
            strategy,
            interface,
            hints,
        })
    }

    /// Hints declared on the interface; defaults for unknown names
    pub fn hints(&self, method_name: &str) -> SchedulingHints {
        self.hints.get(method_name).copied().unwrap_or_default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method Targets
// ─────────────────────────────────────────────────────────────────────────────

/// Target behind synthesized adapters
pub struct SynthesizedTarget {
    plugin: RegisteredPlugin,
    plan: Arc<AdapterPlan>,
}

#[async_trait]
impl MethodTarget for SynthesizedTarget {
    fn scheduling_hints(&self, method_name: &str) -> SchedulingHints {
        self.plan.hints(method_name)
    }

    async fn invoke(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        let hints = self.plan.hints(method_name);

        // A host applies the interface hints itself, one-way included
        if self.plugin.is_scheduled() {
            return self.plugin.call(method_name, params, Some(hints)).await;
        }

        if !hints.one_way {
            return self.plugin.call(method_name, params, None).await;
        }

        let plugin = self.plugin.clone();
        let method = method_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = plugin.call(&method, params, None).await {
                tracing::warn!(method = %method, error = %e, "One-way call failed");
            }
        });
        Ok(Value::Null)
    }
}

/// Generic forwarding target
///
/// Does not see interface markers: every method reports default hints, so
/// schedulers treat all calls as exclusive and awaited.
pub struct InterceptionProxy {
    plugin: RegisteredPlugin,
}

#[async_trait]
impl MethodTarget for InterceptionProxy {
    fn scheduling_hints(&self, _method_name: &str) -> SchedulingHints {
        SchedulingHints::default()
    }

    async fn invoke(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        self.plugin
            .call(method_name, params, Some(SchedulingHints::default()))
            .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interface Adapter
// ─────────────────────────────────────────────────────────────────────────────

/// A plugin seen through a target interface
pub struct InterfaceAdapter<I: ?Sized> {
    adapter: Arc<I>,
    target: Arc<dyn MethodTarget>,
    plan: Arc<AdapterPlan>,
}

impl<I: ?Sized> InterfaceAdapter<I> {
    pub fn interface(&self) -> &Arc<I> {
        &self.adapter
    }

    pub fn plan(&self) -> &Arc<AdapterPlan> {
        &self.plan
    }

    /// Hints the scheduler sees for a routing name
    pub fn scheduling_hints(&self, method_name: &str) -> SchedulingHints {
        self.target.scheduling_hints(method_name)
    }
}

impl<I: ?Sized> Clone for InterfaceAdapter<I> {
    fn clone(&self) -> Self {
        Self {
            adapter: Arc::clone(&self.adapter),
            target: Arc::clone(&self.target),
            plan: Arc::clone(&self.plan),
        }
    }
}

impl<I: ?Sized> Deref for InterfaceAdapter<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.adapter
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Generator
// ─────────────────────────────────────────────────────────────────────────────

pub struct AdapterGenerator {
    strategy: AdapterStrategy,
    plans: DashMap<(&'static str, TypeId), Arc<AdapterPlan>>,
}

impl AdapterGenerator {
    pub fn new(strategy: AdapterStrategy) -> Self {
        Self {
            strategy,
            plans: DashMap::new(),
        }
    }

    pub fn strategy(&self) -> AdapterStrategy {
        self.strategy
    }

    /// Adapter exposing a registered plugin as `I`
    pub fn create_adapter<I>(&self, plugin: &RegisteredPlugin) -> PluginResult<InterfaceAdapter<I>>
    where
        I: ActorInterface + ?Sized,
    {
        let plan = self.plan_for::<I>(plugin)?;

        let target: Arc<dyn MethodTarget> = match self.strategy {
            AdapterStrategy::CodeSynthesis => Arc::new(SynthesizedTarget {
                plugin: plugin.clone(),
                plan: Arc::clone(&plan),
            }),
            AdapterStrategy::InterceptionProxy => Arc::new(InterceptionProxy {
                plugin: plugin.clone(),
            }),
        };

        Ok(InterfaceAdapter {
            adapter: I::bind(Arc::clone(&target)),
            target,
            plan,
        })
    }

    fn plan_for<I>(&self, plugin: &RegisteredPlugin) -> PluginResult<Arc<AdapterPlan>>
    where
        I: ActorInterface + ?Sized,
    {
        let key = (plugin.plugin.type_name(), TypeId::of::<I>());
        if let Some(plan) = self.plans.get(&key) {
            return Ok(Arc::clone(plan.value()));
        }

        let plan = Arc::new(AdapterPlan::build(plugin, I::descriptor(), self.strategy)?);
        tracing::debug!(
            plugin = plan.plugin_type,
            interface = %plan.interface.name,
            strategy = ?self.strategy,
            "Adapter plan built"
        );
        Ok(Arc::clone(self.plans.entry(key).or_insert(plan).value()))
    }

    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }
}

impl Default for AdapterGenerator {
    fn default() -> Self {
        Self::new(AdapterStrategy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{CounterPlugin, EmptyPlugin};
    use plugin_types::agent_interface;
    use std::time::Duration;

    #[agent_interface]
    pub trait CounterActor: Send + Sync {
        #[read_only]
        async fn current(&self) -> PluginResult<i64>;

        #[method(name = "add")]
        async fn add_amount(&self, amount: i64) -> PluginResult<i64>;

        #[one_way]
        async fn bump(&self) -> PluginResult<()>;

        #[always_interleave]
        async fn bumps(&self) -> PluginResult<u64>;

        async fn ping(&self) -> PluginResult<String>;
    }

    /// Declares a plugin-mutating method read-only
    #[agent_interface]
    pub trait RelaxedWriter: Send + Sync {
        #[read_only]
        async fn slow_write(&self, millis: u64) -> PluginResult<()>;
    }

    #[agent_interface]
    pub trait NoMethods: Send + Sync {}

    #[agent_interface]
    pub trait Duplicated: Send + Sync {
        async fn current(&self) -> PluginResult<i64>;

        #[method(name = "current")]
        async fn also_current(&self) -> PluginResult<i64>;
    }

    #[agent_interface]
    pub trait Flying: Send + Sync {
        async fn fly(&self) -> PluginResult<()>;
    }

    #[agent_interface]
    pub trait WrongArity: Send + Sync {
        #[method(name = "add")]
        async fn add_nothing(&self) -> PluginResult<i64>;
    }

    #[agent_interface]
    pub trait OneWayWithResult: Send + Sync {
        #[one_way]
        async fn current(&self) -> PluginResult<i64>;
    }

    fn counter() -> RegisteredPlugin {
        RegisteredPlugin::new(Arc::new(CounterPlugin::default()))
    }

    #[tokio::test]
    async fn test_synthesized_adapter_forwards_calls() {
        let generator = AdapterGenerator::new(AdapterStrategy::CodeSynthesis);
        let adapter = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();

        assert_eq!(adapter.add_amount(3).await.unwrap(), 3);
        assert_eq!(adapter.current().await.unwrap(), 3);
        assert_eq!(adapter.ping().await.unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_interface_hints_are_authoritative() {
        let generator = AdapterGenerator::new(AdapterStrategy::CodeSynthesis);
        let adapter = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();

        assert!(adapter.scheduling_hints("current").read_only);
        assert!(adapter.scheduling_hints("bump").one_way);
        // Marked always_interleave on the plugin, plain on the interface
        assert!(!adapter.scheduling_hints("ping").always_interleave);
        assert!(adapter.scheduling_hints("unknown").is_default());
    }

    #[test]
    fn test_interface_can_relax_plugin_hints() {
        let plugin = counter();
        assert!(!plugin.router.is_read_only("slow_write"));

        let generator = AdapterGenerator::new(AdapterStrategy::CodeSynthesis);
        let adapter = generator.create_adapter::<dyn RelaxedWriter>(&plugin).unwrap();
        assert!(adapter.scheduling_hints("slow_write").read_only);
        assert!(adapter.plan().hints("slow_write").read_only);
    }

    #[tokio::test]
    async fn test_one_way_returns_before_completion() {
        let generator = AdapterGenerator::new(AdapterStrategy::CodeSynthesis);
        let adapter = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();

        adapter.bump().await.unwrap();
        assert_eq!(adapter.bumps().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(adapter.bumps().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_interception_proxy_awaits_and_reports_defaults() {
        let generator = AdapterGenerator::new(AdapterStrategy::InterceptionProxy);
        let adapter = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();

        adapter.bump().await.unwrap();
        assert_eq!(adapter.bumps().await.unwrap(), 1);
        assert!(adapter.scheduling_hints("current").is_default());
        assert_eq!(adapter.plan().strategy, AdapterStrategy::InterceptionProxy);
    }

    #[test]
    fn test_plans_are_cached_per_type_and_interface() {
        let generator = AdapterGenerator::default();
        let first = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();
        let second = generator.create_adapter::<dyn CounterActor>(&counter()).unwrap();

        assert!(Arc::ptr_eq(first.plan(), second.plan()));
        assert_eq!(generator.plan_count(), 1);
        assert_eq!(first.plan().interface.name, "CounterActor");
    }

    #[test]
    fn test_interface_level_failures() {
        let generator = AdapterGenerator::default();

        let err = generator.create_adapter::<dyn NoMethods>(&counter()).err().unwrap();
        assert!(matches!(
            err,
            PluginError::ProxyGeneration { interface, .. } if interface == "NoMethods"
        ));

        let err = generator.create_adapter::<dyn Duplicated>(&counter()).err().unwrap();
        assert!(matches!(
            err,
            PluginError::ProxyGeneration { reason, .. } if reason.contains("current")
        ));
    }

    #[test]
    fn test_method_level_failures() {
        let generator = AdapterGenerator::default();

        let err = generator.create_adapter::<dyn Flying>(&counter()).err().unwrap();
        assert!(matches!(err, PluginError::MethodGeneration { method, .. } if method == "fly"));

        let err = generator.create_adapter::<dyn WrongArity>(&counter()).err().unwrap();
        assert!(matches!(
            err,
            PluginError::MethodGeneration { method, .. } if method == "add_nothing"
        ));

        let err = generator
            .create_adapter::<dyn OneWayWithResult>(&counter())
            .err()
            .unwrap();
        assert!(matches!(
            err,
            PluginError::MethodGeneration { reason, .. } if reason.contains("one-way")
        ));

        let empty = RegisteredPlugin::new(Arc::new(EmptyPlugin));
        assert!(generator.create_adapter::<dyn CounterActor>(&empty).is_err());
        assert_eq!(generator.plan_count(), 0);
    }
}
