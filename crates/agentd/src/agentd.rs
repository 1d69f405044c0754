//! agentd - command-line host for agent plugins
//!
//! Wires the plugin runtime together from configuration: native modules
//! from the plugins directory, the builtin weather plugin through the static
//! backend, and a file or in-memory host journal.

pub mod config;
pub mod logging;

use std::sync::Arc;

use anyhow::Context;
use plugin_runtime::{
    FileJournal, HostJournal, InMemoryJournal, LoaderConfig, ModuleBackend, NativeModuleBackend,
    PluginHostFactory, PluginHostHandle, PluginLoader, StaticModuleBackend,
};

use crate::config::{AgentConfig, AgentdConfig, JournalConfig};

/// Module id of the weather plugin linked into agentd
pub const BUILTIN_WEATHER: &str = "weather";

/// Modules compiled into the binary
pub fn builtin_backend() -> StaticModuleBackend {
    StaticModuleBackend::new().with_module(BUILTIN_WEATHER, &weather_plugin::AGENT_PLUGIN_MODULE)
}

pub fn build_loader(config: &LoaderConfig) -> Arc<PluginLoader> {
    let backends: Vec<Arc<dyn ModuleBackend>> = vec![
        Arc::new(NativeModuleBackend::new()),
        Arc::new(builtin_backend()),
    ];
    Arc::new(PluginLoader::new(config.clone(), backends))
}

pub fn build_journal(config: &JournalConfig) -> Arc<dyn HostJournal> {
    match &config.path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using file journal");
            Arc::new(FileJournal::new(path))
        }
        None => {
            tracing::info!("Using in-memory journal; host state is lost on exit");
            Arc::new(InMemoryJournal::new())
        }
    }
}

pub fn build_factory(config: &AgentdConfig) -> PluginHostFactory {
    PluginHostFactory::new(
        build_loader(&config.loader),
        build_journal(&config.journal),
        config.host.clone(),
    )
}

/// Activate and configure every configured agent
pub async fn start_agents(
    factory: &PluginHostFactory,
    agents: &[AgentConfig],
) -> anyhow::Result<Vec<PluginHostHandle>> {
    let mut handles = Vec::with_capacity(agents.len());
    for agent in agents {
        let handle = factory
            .create(
                &agent.id,
                &agent.plugin,
                agent.version.as_deref(),
                agent.config.clone(),
            )
            .await
            .with_context(|| format!("failed to start agent {}", agent.id))?;
        tracing::info!(agent_id = %agent.id, plugin = %agent.plugin, "Agent configured");
        handles.push(handle);
    }
    Ok(handles)
}
