//! Method Router
//!
//! Serves the routing table of one plugin instance. The table is computed
//! once from `AgentPlugin::routes` when the plugin is registered and swapped
//! in wholesale, so readers never observe a partially built table.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use plugin_types::{
    AgentPlugin, MethodRoutingInfo, PluginError, PluginResult, SchedulingHints, coerce_to_type,
};
use serde_json::Value;

/// Immutable routing table
#[derive(Debug, Default)]
struct RoutingTable {
    /// Routing key (method name or handler alias) → entry
    entries: HashMap<String, Arc<MethodRoutingInfo>>,
    /// Primary method names in declaration order
    names: Vec<String>,
}

impl RoutingTable {
    fn build(routes: Vec<MethodRoutingInfo>) -> Self {
        let mut table = RoutingTable::default();

        for route in routes {
            let route = Arc::new(route);
            if table.entries.contains_key(&route.method_name) {
                tracing::warn!(method = %route.method_name, "Duplicate routing entry replaced");
            } else {
                table.names.push(route.method_name.clone());
            }
            table
                .entries
                .insert(route.method_name.clone(), Arc::clone(&route));
            if route.handler_name != route.method_name {
                table
                    .entries
                    .entry(route.handler_name.clone())
                    .or_insert_with(|| Arc::clone(&route));
            }
        }

        table
    }
}

/// Name-based dispatcher for one plugin instance
#[derive(Debug, Default)]
pub struct MethodRouter {
    table: RwLock<Arc<RoutingTable>>,
}

impl MethodRouter {
    /// Create a router with an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router already registered with a plugin
    pub fn for_plugin(plugin: &dyn AgentPlugin) -> Self {
        let router = Self::new();
        router.register(plugin);
        router
    }

    /// Rebuild the routing table from the plugin's annotated methods
    pub fn register(&self, plugin: &dyn AgentPlugin) {
        let table = Arc::new(RoutingTable::build(plugin.routes()));
        tracing::debug!(
            plugin = plugin.type_name(),
            methods = table.names.len(),
            "Routing table built"
        );
        *self.table.write() = table;
    }

    fn snapshot(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.table.read())
    }

    /// Invoke a method by name with positional parameters
    ///
    /// Errors raised by the plugin are returned unchanged.
    pub async fn route_call(
        &self,
        plugin: &dyn AgentPlugin,
        method_name: &str,
        params: Vec<Value>,
    ) -> PluginResult<Value> {
        let info = self
            .snapshot()
            .entries
            .get(method_name)
            .cloned()
            .ok_or_else(|| PluginError::MethodNotFound(method_name.to_string()))?;

        if params.len() != info.parameter_types.len() {
            return Err(PluginError::ParameterMismatch {
                method: method_name.to_string(),
                expected: info.parameter_types.len(),
                actual: params.len(),
            });
        }

        let params = params
            .into_iter()
            .zip(&info.parameter_types)
            .map(|(value, declared)| coerce_to_type(value, declared))
            .collect::<PluginResult<Vec<_>>>()?;

        plugin.execute_method(&info.method_name, params).await
    }

    pub fn get_routing_info(&self, method_name: &str) -> Option<MethodRoutingInfo> {
        self.snapshot()
            .entries
            .get(method_name)
            .map(|info| MethodRoutingInfo::clone(info))
    }

    pub fn is_read_only(&self, method_name: &str) -> bool {
        self.scheduling_hints(method_name).read_only
    }

    pub fn always_interleave(&self, method_name: &str) -> bool {
        self.scheduling_hints(method_name).always_interleave
    }

    pub fn is_one_way(&self, method_name: &str) -> bool {
        self.scheduling_hints(method_name).one_way
    }

    /// All markers of a method; defaults for unknown names
    pub fn scheduling_hints(&self, method_name: &str) -> SchedulingHints {
        self.snapshot()
            .entries
            .get(method_name)
            .map(|info| info.hints())
            .unwrap_or_default()
    }

    /// Primary method names in declaration order
    pub fn method_names(&self) -> Vec<String> {
        self.snapshot().names.clone()
    }

    pub fn contains(&self, method_name: &str) -> bool {
        self.snapshot().entries.contains_key(method_name)
    }
}
