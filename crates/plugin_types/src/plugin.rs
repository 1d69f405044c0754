//! Plugin Contract
//!
//! `AgentPlugin` is the capability set every loadable plugin exposes. It is
//! normally not implemented by hand: `#[agent_plugin]` generates it from an
//! annotated impl block and delegates the lifecycle hooks to
//! `PluginLifecycle`, which the plugin author implements (usually with the
//! defaults).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{AgentContext, AgentEvent, MethodRoutingInfo, PluginDescriptor, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Contract
// ─────────────────────────────────────────────────────────────────────────────

/// The contract a loadable agent implementation must satisfy
///
/// All methods take `&self`; plugins keep mutable state behind their own locks
/// so the host can dispatch read-only and interleaved calls concurrently.
#[async_trait]
pub trait AgentPlugin: Send + Sync + 'static {
    /// Identity and capability metadata
    fn descriptor(&self) -> PluginDescriptor;

    /// Fully-qualified Rust type name of the plugin
    fn type_name(&self) -> &'static str;

    /// Routing table entries for every annotated method
    fn routes(&self) -> Vec<MethodRoutingInfo>;

    /// Called once after loading, before any call is routed
    async fn initialize(&self, context: Arc<dyn AgentContext>) -> PluginResult<()>;

    /// Invoke an annotated method by routing name with positional parameters
    async fn execute_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value>;

    /// Dispatch an event to the matching handler
    async fn handle_event(&self, event: AgentEvent) -> PluginResult<()>;

    /// Opaque plugin state
    async fn get_state(&self) -> PluginResult<Option<Value>>;

    async fn set_state(&self, state: Option<Value>) -> PluginResult<()>;

    /// Release resources; the instance is not used afterwards
    async fn dispose(&self) -> PluginResult<()>;
}

impl std::fmt::Debug for dyn AgentPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentPlugin")
            .field("type_name", &self.type_name())
            .field("descriptor", &self.descriptor())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle hooks for plugins built with `#[agent_plugin]`
///
/// Every hook has a default, so `impl PluginLifecycle for MyPlugin {}` is
/// enough for a stateless plugin.
#[async_trait]
pub trait PluginLifecycle: Send + Sync + 'static {
    async fn on_initialize(&self, _context: Arc<dyn AgentContext>) -> PluginResult<()> {
        Ok(())
    }

    async fn on_dispose(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Snapshot returned by `AgentPlugin::get_state`
    async fn state(&self) -> PluginResult<Option<Value>> {
        Ok(None)
    }

    /// Applied by `AgentPlugin::set_state`
    async fn restore_state(&self, _state: Option<Value>) -> PluginResult<()> {
        Ok(())
    }

    /// Called for events no handler matches
    async fn on_unhandled_event(&self, event: AgentEvent) -> PluginResult<()> {
        tracing::debug!(event_type = %event.event_type, "Unhandled event");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Type
// ─────────────────────────────────────────────────────────────────────────────

/// Static metadata of a plugin type, readable without instantiating it
pub trait PluginType {
    /// Fully-qualified type name used for type resolution at load time
    const TYPE_NAME: &'static str;

    fn plugin_descriptor() -> PluginDescriptor;
}
