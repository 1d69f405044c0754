//! Plugin Host
//!
//! The identity-bearing actor that owns one plugin's lifecycle:
//! `Unconfigured → Configured → Loaded → (Reloading → Loaded)* → Disposed`.
//!
//! A host is a tokio task reading a command mailbox and the shared event bus.
//! Dispatch follows the plugin's scheduling hints:
//! - mutating calls and lifecycle commands run one at a time, in mailbox
//!   order, on the exclusive lane
//! - read-only calls run concurrently with each other, never with the lane
//! - always-interleave calls run immediately
//! - one-way calls are acknowledged before they run; failures are logged
//!
//! Durable state changes are appended to the host journal before they are
//! applied, and replayed by [`PluginHost::activate`].

mod factory;
mod handle;
mod state;

pub use factory::*;
pub use handle::*;
pub use state::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use plugin_types::{
    AgentEvent, AgentLogger, AgentPlugin, PluginDescriptor, PluginError, PluginResult,
    SchedulingHints,
};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    ActorDirectory, AgentContextBuilder, CorrelationHub, EventBus, EventEnvelope, HostConfig,
    HostJournal, LoadedPlugin, LocalActorDirectory, PluginLoader, PluginRegistry,
    RegisteredPlugin, ServiceResolver, Topology,
};

/// Description reported while no plugin is configured
pub const DEFAULT_DESCRIPTION: &str = "No plugin loaded";

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a host talks to, shared by all hosts of a factory
#[derive(Clone)]
pub struct HostEnvironment {
    pub loader: Arc<PluginLoader>,
    pub registry: Arc<PluginRegistry>,
    pub journal: Arc<dyn HostJournal>,
    pub bus: Arc<EventBus>,
    pub correlation: Arc<CorrelationHub>,
    pub topology: Arc<Topology>,
    pub directory: Arc<LocalActorDirectory>,
    pub services: Arc<ServiceResolver>,
    pub config: HostConfig,
}

impl HostEnvironment {
    /// Fresh substrate around a loader and a journal
    pub fn new(
        loader: Arc<PluginLoader>,
        journal: Arc<dyn HostJournal>,
        config: HostConfig,
    ) -> Self {
        let registry = PluginRegistry::new_shared();
        let services = Arc::new(ServiceResolver::new());
        services.provide(Arc::clone(&registry));
        services.provide(Arc::clone(&loader));

        Self {
            loader,
            registry,
            journal,
            bus: Arc::new(EventBus::new(config.event_buffer)),
            correlation: Arc::new(CorrelationHub::new()),
            topology: Arc::new(Topology::new()),
            directory: Arc::new(LocalActorDirectory::new()),
            services,
            config,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host Core
// ─────────────────────────────────────────────────────────────────────────────

/// The plugin a host is running and the load it came from
struct Slot {
    registered: RegisteredPlugin,
    loaded: Arc<LoadedPlugin>,
}

/// State shared by the host loop, its exclusive lane and spawned calls
struct HostCore {
    id: Arc<str>,
    env: HostEnvironment,
    phase: Arc<AtomicU8>,
    state: Mutex<PluginHostState>,
    slot: RwLock<Option<Slot>>,
    /// Readers: read-only calls. Writer: the exclusive lane.
    gate: tokio::sync::RwLock<()>,
    /// Scheduler given to the registry; does not keep the loop alive
    weak: WeakHostHandle,
}

impl HostCore {
    fn phase(&self) -> HostPhase {
        HostPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    fn set_phase(&self, phase: HostPhase) {
        let previous = HostPhase::from_u8(self.phase.swap(phase as u8, Ordering::SeqCst));
        if previous != phase {
            tracing::debug!(
                host_id = %self.id,
                from = %previous,
                to = %phase,
                "Host phase changed"
            );
        }
    }

    fn current(&self) -> Option<RegisteredPlugin> {
        self.slot.read().as_ref().map(|slot| slot.registered.clone())
    }

    fn scheduling_hints(&self, method: &str) -> SchedulingHints {
        self.current()
            .map(|p| p.router.scheduling_hints(method))
            .unwrap_or_default()
    }

    fn not_loaded() -> PluginError {
        PluginError::InvalidOperation("Plugin not loaded".into())
    }

    fn disposed(&self) -> PluginError {
        PluginError::InvalidOperation(format!("Host {} is disposed", self.id))
    }

    /// Persist an entry, then apply it
    async fn record(&self, entry: HostLogEntry) -> PluginResult<()> {
        self.env.journal.append(&self.id, &entry).await?;
        self.state.lock().apply(&entry);
        Ok(())
    }

    /// Loaded plugin, loading it first when only configured
    ///
    /// Must run on the exclusive lane.
    async fn ensure_loaded(&self) -> PluginResult<Option<RegisteredPlugin>> {
        if let Some(plugin) = self.current() {
            return Ok(Some(plugin));
        }
        match self.phase() {
            HostPhase::Unconfigured => Ok(None),
            HostPhase::Disposed => Err(self.disposed()),
            _ => self.load(false).await.map(Some),
        }
    }

    /// Load, initialize and register the configured plugin
    async fn load(&self, reloaded: bool) -> PluginResult<RegisteredPlugin> {
        let state = self.state.lock().clone();
        let Some(name) = state.plugin_name.clone() else {
            return Err(PluginError::InvalidOperation("Plugin not configured".into()));
        };
        let version = state.plugin_version.as_deref();
        let key = plugin_types::plugin_key(&name, version);

        let loaded = self.env.loader.load_plugin(&name, version).await?;
        let plugin: Arc<dyn AgentPlugin> = loaded.clone();

        let context = AgentContextBuilder::new()
            .host(self.id.to_string(), Arc::clone(&self.env.bus))
            .logger(AgentLogger::new(Arc::clone(&self.id)))
            .directory(Arc::clone(&self.env.directory) as Arc<dyn ActorDirectory>)
            .services(Arc::clone(&self.env.services))
            .configuration(state.configuration.clone())
            .correlation(Arc::clone(&self.env.correlation))
            .topology(Arc::clone(&self.env.topology))
            .response_timeout(self.env.config.response_timeout)
            .build()?;

        if let Err(e) = plugin.initialize(Arc::new(context)).await {
            tracing::error!(
                host_id = %self.id,
                plugin = %key,
                error = %e,
                "Plugin failed to initialize"
            );
            self.env.loader.release(&loaded);
            return Err(e);
        }

        if let Some(saved) = state.plugin_state.clone() {
            if let Err(e) = plugin.set_state(Some(saved)).await {
                tracing::warn!(
                    host_id = %self.id,
                    plugin = %key,
                    error = %e,
                    "Failed to restore plugin state"
                );
            }
        }

        // Nothing is visible to callers until the load is on record
        let loaded_at = Utc::now();
        let entry = if reloaded {
            HostLogEntry::PluginReloaded { loaded_at }
        } else {
            HostLogEntry::PluginLoaded { loaded_at }
        };
        if let Err(e) = self.record(entry).await {
            tracing::error!(
                host_id = %self.id,
                plugin = %key,
                error = %e,
                "Failed to record plugin load"
            );
            if let Err(e) = plugin.dispose().await {
                tracing::warn!(host_id = %self.id, error = %e, "Plugin dispose failed");
            }
            self.env.loader.release(&loaded);
            return Err(e);
        }

        let registered = RegisteredPlugin::new(plugin).with_scheduler(Arc::new(self.weak.clone()));
        self.env.registry.insert(self.id.to_string(), registered.clone());
        *self.slot.write() = Some(Slot {
            registered: registered.clone(),
            loaded,
        });
        self.set_phase(HostPhase::Loaded);

        tracing::info!(host_id = %self.id, plugin = %key, reloaded, "Plugin ready");
        Ok(registered)
    }

    /// Take the plugin out of service; disposal failures are only logged
    async fn release(&self) {
        let Some(previous) = self.slot.write().take() else {
            return;
        };
        if let Err(e) = previous.registered.plugin.dispose().await {
            tracing::warn!(host_id = %self.id, error = %e, "Plugin dispose failed");
        }
        self.env.registry.unregister(&self.id);
        self.env.loader.release(&previous.loaded);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    async fn initialize_configuration(
        &self,
        plugin_name: String,
        plugin_version: Option<String>,
        configuration: Option<Map<String, Value>>,
    ) -> PluginResult<()> {
        let plugin = plugin_types::plugin_key(&plugin_name, plugin_version.as_deref());
        let unchanged = {
            let state = self.state.lock();
            state.is_same_plugin(&plugin_name, plugin_version.as_deref())
                && state.configuration == configuration
        };
        if unchanged {
            tracing::debug!(host_id = %self.id, plugin = %plugin, "Configuration unchanged");
            return Ok(());
        }

        tracing::info!(host_id = %self.id, plugin = %plugin, "Configuring host");
        self.record(HostLogEntry::ConfigurationInitialized {
            plugin_name,
            plugin_version,
            configuration,
        })
        .await?;

        if self.current().is_none() {
            self.set_phase(HostPhase::Configured);
        }
        Ok(())
    }

    /// Exclusive call, loading on first use
    async fn call_method(&self, method: &str, params: Vec<Value>) -> PluginResult<Value> {
        let plugin = self.ensure_loaded().await?.ok_or_else(Self::not_loaded)?;
        plugin
            .router
            .route_call(plugin.plugin.as_ref(), method, params)
            .await
    }

    /// Concurrent call on whatever plugin is in the slot
    async fn call_loaded(&self, method: &str, params: Vec<Value>) -> PluginResult<Value> {
        let plugin = self.current().ok_or_else(Self::not_loaded)?;
        plugin
            .router
            .route_call(plugin.plugin.as_ref(), method, params)
            .await
    }

    async fn handle_event(&self, event: AgentEvent) -> PluginResult<()> {
        let plugin = self.ensure_loaded().await?.ok_or_else(Self::not_loaded)?;
        plugin.plugin.handle_event(event).await
    }

    async fn get_state(&self) -> PluginResult<Option<Value>> {
        match self.ensure_loaded().await? {
            Some(plugin) => plugin.plugin.get_state().await,
            None => Ok(None),
        }
    }

    /// State of the plugin in the slot, without loading
    async fn read_state(&self) -> PluginResult<Option<Value>> {
        match self.current() {
            Some(plugin) => plugin.plugin.get_state().await,
            None => Ok(None),
        }
    }

    async fn set_state(&self, state: Option<Value>) -> PluginResult<()> {
        if self.phase() == HostPhase::Disposed {
            return Err(self.disposed());
        }
        let plugin = self.current().ok_or_else(Self::not_loaded)?;
        plugin.plugin.set_state(state.clone()).await?;
        self.record(HostLogEntry::PluginStateChanged { state }).await
    }

    async fn get_metadata(&self) -> PluginResult<Option<PluginDescriptor>> {
        Ok(self.ensure_loaded().await?.map(|p| p.plugin.descriptor()))
    }

    async fn get_description(&self) -> PluginResult<String> {
        Ok(match self.ensure_loaded().await? {
            Some(plugin) => {
                let descriptor = plugin.plugin.descriptor();
                if descriptor.description.is_empty() {
                    descriptor.key()
                } else {
                    descriptor.description
                }
            }
            None => DEFAULT_DESCRIPTION.to_string(),
        })
    }

    async fn reload(&self) -> PluginResult<()> {
        if !self.state.lock().is_configured() {
            return Err(PluginError::InvalidOperation("Plugin not configured".into()));
        }

        self.set_phase(HostPhase::Reloading);
        self.release().await;

        match self.load(true).await {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::error!(host_id = %self.id, error = %e, "Reload failed");
                self.set_phase(HostPhase::Configured);
                Err(e)
            }
        }
    }

    async fn dispose(&self) -> PluginResult<()> {
        self.release().await;
        self.env.directory.remove(&self.id);
        self.env.topology.remove_agent(&self.id);
        self.set_phase(HostPhase::Disposed);
        tracing::info!(host_id = %self.id, "Host disposed");
        Ok(())
    }

    /// Whether an envelope from the bus is meant for this host
    fn wants(&self, envelope: &EventEnvelope) -> bool {
        envelope.publisher != *self.id
            && self.env.topology.is_subscribed(&self.id, &envelope.publisher)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Host
// ─────────────────────────────────────────────────────────────────────────────

pub struct PluginHost;

impl PluginHost {
    /// Start a host, rebuilding its state from the journal
    pub async fn activate(host_id: &str, env: HostEnvironment) -> PluginResult<PluginHostHandle> {
        let entries = env.journal.replay(host_id).await?;
        let state = PluginHostState::replay(&entries);
        let phase = if state.is_configured() {
            HostPhase::Configured
        } else {
            HostPhase::Unconfigured
        };

        tracing::info!(
            host_id = %host_id,
            entries = entries.len(),
            phase = %phase,
            "Activating plugin host"
        );

        let (command_tx, command_rx) = mpsc::channel(env.config.mailbox_capacity.max(1));
        let events = env.bus.subscribe();
        let id: Arc<str> = Arc::from(host_id);
        let phase = Arc::new(AtomicU8::new(phase as u8));
        let handle = PluginHostHandle::new(Arc::clone(&id), command_tx, Arc::clone(&phase));

        let core = Arc::new(HostCore {
            id,
            env,
            phase,
            state: Mutex::new(state),
            slot: RwLock::new(None),
            gate: tokio::sync::RwLock::new(()),
            weak: handle.downgrade(),
        });

        tokio::spawn(run_host_loop(core, command_rx, events));
        Ok(handle)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────────────────────────────────────

type ExclusiveJob = BoxFuture<'static, ()>;

/// Where the result of a call goes
enum Completion {
    Caller(oneshot::Sender<PluginResult<Value>>),
    /// One-way call, already acknowledged
    Logged { host_id: Arc<str>, method: String },
}

impl Completion {
    fn finish(self, result: PluginResult<Value>) {
        match self {
            Completion::Caller(reply) => {
                let _ = reply.send(result);
            }
            Completion::Logged { host_id, method } => {
                if let Err(e) = result {
                    tracing::warn!(
                        host_id = %host_id,
                        method = %method,
                        error = %e,
                        "One-way call failed"
                    );
                }
            }
        }
    }
}

async fn run_host_loop(
    core: Arc<HostCore>,
    mut command_rx: mpsc::Receiver<HostCommand>,
    mut event_rx: broadcast::Receiver<EventEnvelope>,
) {
    let (lane_tx, lane_rx) = mpsc::unbounded_channel::<ExclusiveJob>();
    let lane = tokio::spawn(run_exclusive_lane(Arc::clone(&core), lane_rx));
    let mut events_open = true;
    let mut abandoned = false;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                let Some(command) = command else {
                    tracing::debug!(host_id = %core.id, "All handles dropped");
                    abandoned = true;
                    break;
                };
                if let HostCommand::Dispose { reply } = command {
                    let job_core = Arc::clone(&core);
                    let _ = lane_tx.send(Box::pin(async move {
                        let _ = reply.send(job_core.dispose().await);
                    }));
                    break;
                }
                dispatch(&core, &lane_tx, command);
            }

            envelope = event_rx.recv(), if events_open => match envelope {
                Ok(envelope) if core.wants(&envelope) => {
                    let job_core = Arc::clone(&core);
                    let _ = lane_tx.send(Box::pin(async move {
                        let event_type = envelope.event.event_type.clone();
                        if let Err(e) = job_core.handle_event(envelope.event).await {
                            tracing::warn!(
                                host_id = %job_core.id,
                                publisher = %envelope.publisher,
                                event_type = %event_type,
                                error = %e,
                                "Error handling subscribed event"
                            );
                        }
                    }));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(host_id = %core.id, skipped, "Host lagged behind the event bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    events_open = false;
                }
            },
        }
    }

    // Queued work, including a pending dispose, still runs
    drop(lane_tx);
    if let Err(e) = lane.await {
        tracing::error!(host_id = %core.id, error = %e, "Exclusive lane panicked");
    }

    // Nobody can reach the host any more; deactivate it
    if abandoned {
        let _guard = core.gate.write().await;
        if let Err(e) = core.dispose().await {
            tracing::warn!(host_id = %core.id, error = %e, "Failed to deactivate host");
        }
    }
    tracing::debug!(host_id = %core.id, "Host loop stopped");
}

async fn run_exclusive_lane(
    core: Arc<HostCore>,
    mut lane_rx: mpsc::UnboundedReceiver<ExclusiveJob>,
) {
    while let Some(job) = lane_rx.recv().await {
        let _guard = core.gate.write().await;
        job.await;
    }
}

fn exclusive(
    lane: &mpsc::UnboundedSender<ExclusiveJob>,
    job: impl std::future::Future<Output = ()> + Send + 'static,
) {
    // The lane outlives the loop, so sending cannot fail while commands arrive
    let _ = lane.send(Box::pin(job));
}

fn dispatch(
    core: &Arc<HostCore>,
    lane: &mpsc::UnboundedSender<ExclusiveJob>,
    command: HostCommand,
) {
    let job_core = Arc::clone(core);

    match command {
        HostCommand::InitializeConfiguration {
            plugin_name,
            plugin_version,
            configuration,
            reply,
        } => exclusive(lane, async move {
            let result = job_core
                .initialize_configuration(plugin_name, plugin_version, configuration)
                .await;
            let _ = reply.send(result);
        }),

        HostCommand::CallMethod {
            method,
            params,
            hints,
            reply,
        } => {
            let hints = hints.unwrap_or_else(|| core.scheduling_hints(&method));
            dispatch_call(core, lane, method, params, hints, reply)
        }

        HostCommand::HandleEvent { event, reply } => exclusive(lane, async move {
            let _ = reply.send(job_core.handle_event(event).await);
        }),

        HostCommand::GetState { reply } => {
            if core.current().is_some() {
                tokio::spawn(async move {
                    let _guard = job_core.gate.read().await;
                    let _ = reply.send(job_core.read_state().await);
                });
            } else {
                exclusive(lane, async move {
                    let _ = reply.send(job_core.get_state().await);
                });
            }
        }

        HostCommand::SetState { state, reply } => exclusive(lane, async move {
            let _ = reply.send(job_core.set_state(state).await);
        }),

        HostCommand::GetMetadata { reply } => exclusive(lane, async move {
            let _ = reply.send(job_core.get_metadata().await);
        }),

        HostCommand::GetDescription { reply } => exclusive(lane, async move {
            let _ = reply.send(job_core.get_description().await);
        }),

        HostCommand::Reload { reply } => exclusive(lane, async move {
            let _ = reply.send(job_core.reload().await);
        }),

        // Handled by the loop
        HostCommand::Dispose { reply } => {
            let _ = reply.send(Err(core.disposed()));
        }
    }
}

fn dispatch_call(
    core: &Arc<HostCore>,
    lane: &mpsc::UnboundedSender<ExclusiveJob>,
    method: String,
    params: Vec<Value>,
    hints: SchedulingHints,
    reply: oneshot::Sender<PluginResult<Value>>,
) {
    let job_core = Arc::clone(core);

    let completion = if hints.one_way {
        let _ = reply.send(Ok(Value::Null));
        Completion::Logged {
            host_id: Arc::clone(&core.id),
            method: method.clone(),
        }
    } else {
        Completion::Caller(reply)
    };

    if hints.always_interleave {
        tokio::spawn(async move {
            completion.finish(job_core.call_loaded(&method, params).await);
        });
    } else if hints.read_only {
        tokio::spawn(async move {
            let _guard = job_core.gate.read().await;
            completion.finish(job_core.call_loaded(&method, params).await);
        });
    } else {
        exclusive(lane, async move {
            completion.finish(job_core.call_method(&method, params).await);
        });
    }
}
