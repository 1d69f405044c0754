//! Host Handle
//!
//! Cloneable address of a running plugin host.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use plugin_types::{AgentEvent, PluginDescriptor, PluginError, PluginResult, SchedulingHints};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};

use super::HostPhase;
use crate::{EventReceiver, MethodCallable, PluginScheduler, RemoteAgent};

type Reply<T> = oneshot::Sender<PluginResult<T>>;

/// Messages accepted by a host
pub(crate) enum HostCommand {
    InitializeConfiguration {
        plugin_name: String,
        plugin_version: Option<String>,
        configuration: Option<Map<String, Value>>,
        reply: Reply<()>,
    },
    CallMethod {
        method: String,
        params: Vec<Value>,
        /// Overrides the plugin's hints, e.g. with an adapter's
        hints: Option<SchedulingHints>,
        reply: Reply<Value>,
    },
    HandleEvent {
        event: AgentEvent,
        reply: Reply<()>,
    },
    GetState {
        reply: Reply<Option<Value>>,
    },
    SetState {
        state: Option<Value>,
        reply: Reply<()>,
    },
    GetMetadata {
        reply: Reply<Option<PluginDescriptor>>,
    },
    GetDescription {
        reply: Reply<String>,
    },
    Reload {
        reply: Reply<()>,
    },
    Dispose {
        reply: Reply<()>,
    },
}

#[derive(Clone)]
pub struct PluginHostHandle {
    host_id: Arc<str>,
    command_tx: mpsc::Sender<HostCommand>,
    phase: Arc<AtomicU8>,
}

impl PluginHostHandle {
    pub(crate) fn new(
        host_id: Arc<str>,
        command_tx: mpsc::Sender<HostCommand>,
        phase: Arc<AtomicU8>,
    ) -> Self {
        Self {
            host_id,
            command_tx,
            phase,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn phase(&self) -> HostPhase {
        HostPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_disposed(&self) -> bool {
        self.phase().is_terminal()
    }

    fn disposed_error(&self) -> PluginError {
        disposed_error(&self.host_id)
    }

    /// Address that does not keep the host running
    pub(crate) fn downgrade(&self) -> WeakHostHandle {
        WeakHostHandle {
            host_id: Arc::clone(&self.host_id),
            command_tx: self.command_tx.downgrade(),
            phase: Arc::clone(&self.phase),
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> HostCommand,
    ) -> PluginResult<T> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }

        let (tx, rx) = oneshot::channel();
        self.command_tx
            .send(command(tx))
            .await
            .map_err(|_| self.disposed_error())?;
        rx.await.map_err(|_| self.disposed_error())?
    }

    /// Record which plugin this host runs; overwrites earlier configuration
    pub async fn initialize_configuration(
        &self,
        plugin_name: impl Into<String>,
        plugin_version: Option<&str>,
        configuration: Option<Map<String, Value>>,
    ) -> PluginResult<()> {
        let plugin_name = plugin_name.into();
        let plugin_version = plugin_version.map(str::to_string);
        self.request(|reply| HostCommand::InitializeConfiguration {
            plugin_name,
            plugin_version,
            configuration,
            reply,
        })
        .await
    }

    pub async fn call_method(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
    ) -> PluginResult<Value> {
        self.call_with_hints(method, params, None).await
    }

    /// Call dispatched with the given hints instead of the plugin's
    pub async fn call_with_hints(
        &self,
        method: impl Into<String>,
        params: Vec<Value>,
        hints: Option<SchedulingHints>,
    ) -> PluginResult<Value> {
        let method = method.into();
        self.request(|reply| HostCommand::CallMethod {
            method,
            params,
            hints,
            reply,
        })
        .await
    }

    pub async fn handle_event(&self, event: AgentEvent) -> PluginResult<()> {
        self.request(|reply| HostCommand::HandleEvent { event, reply })
            .await
    }

    pub async fn get_state(&self) -> PluginResult<Option<Value>> {
        self.request(|reply| HostCommand::GetState { reply }).await
    }

    pub async fn set_state(&self, state: Option<Value>) -> PluginResult<()> {
        self.request(|reply| HostCommand::SetState { state, reply })
            .await
    }

    pub async fn get_metadata(&self) -> PluginResult<Option<PluginDescriptor>> {
        self.request(|reply| HostCommand::GetMetadata { reply }).await
    }

    pub async fn get_description(&self) -> PluginResult<String> {
        self.request(|reply| HostCommand::GetDescription { reply })
            .await
    }

    /// Replace the plugin instance with a freshly loaded one
    pub async fn reload(&self) -> PluginResult<()> {
        self.request(|reply| HostCommand::Reload { reply }).await
    }

    /// Dispose the plugin and stop the host
    pub async fn dispose(&self) -> PluginResult<()> {
        self.request(|reply| HostCommand::Dispose { reply }).await
    }
}

impl std::fmt::Debug for PluginHostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHostHandle")
            .field("host_id", &self.host_id)
            .field("phase", &self.phase())
            .finish()
    }
}

fn disposed_error(host_id: &str) -> PluginError {
    PluginError::InvalidOperation(format!("Host {} is disposed", host_id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Weak Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Host address held by the registry entry of a hosted plugin
#[derive(Clone)]
pub(crate) struct WeakHostHandle {
    host_id: Arc<str>,
    command_tx: mpsc::WeakSender<HostCommand>,
    phase: Arc<AtomicU8>,
}

impl WeakHostHandle {
    fn upgrade(&self) -> PluginResult<PluginHostHandle> {
        let command_tx = self
            .command_tx
            .upgrade()
            .ok_or_else(|| disposed_error(&self.host_id))?;
        Ok(PluginHostHandle::new(
            Arc::clone(&self.host_id),
            command_tx,
            Arc::clone(&self.phase),
        ))
    }
}

#[async_trait]
impl PluginScheduler for WeakHostHandle {
    async fn schedule_call(
        &self,
        method_name: &str,
        params: Vec<Value>,
        hints: Option<SchedulingHints>,
    ) -> PluginResult<Value> {
        self.upgrade()?
            .call_with_hints(method_name, params, hints)
            .await
    }

    async fn schedule_event(&self, event: AgentEvent) -> PluginResult<()> {
        self.upgrade()?.handle_event(event).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor Capabilities
// ─────────────────────────────────────────────────────────────────────────────

impl RemoteAgent for PluginHostHandle {
    fn agent_id(&self) -> &str {
        &self.host_id
    }

    fn as_method_callable(&self) -> Option<&dyn MethodCallable> {
        Some(self)
    }

    fn as_event_receiver(&self) -> Option<&dyn EventReceiver> {
        Some(self)
    }
}

#[async_trait]
impl MethodCallable for PluginHostHandle {
    async fn call_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        PluginHostHandle::call_method(self, method_name, params).await
    }
}

#[async_trait]
impl EventReceiver for PluginHostHandle {
    async fn receive_event(&self, event: AgentEvent) -> PluginResult<()> {
        self.handle_event(event).await
    }
}
