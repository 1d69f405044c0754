//! Plugin Loader
//!
//! Resolves loadable units into plugin instances:
//! - pick the backend that recognizes the bytes
//! - open the module inside a load context (fresh per load when isolated)
//! - resolve the requested plugin type among the module's exports
//! - instantiate it through the export's factory
//!
//! Loads run on the blocking pool under a fixed deadline.

mod backend;
mod context;

pub use backend::*;
pub use context::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use plugin_types::{
    AgentContext, AgentEvent, AgentPlugin, MethodRoutingInfo, PluginDescriptor, PluginError,
    PluginExport, PluginModuleDecl, PluginResult, async_trait,
};
use serde_json::Value;

use crate::LoaderConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Loaded Plugin
// ─────────────────────────────────────────────────────────────────────────────

/// A plugin instance together with the module it came from
///
/// The instance is declared first so it is dropped before the module.
pub struct LoadedPlugin {
    instance: Box<dyn AgentPlugin>,
    module: Arc<LoadedModule>,
    context: String,
    load_id: u64,
}

impl LoadedPlugin {
    /// Identifies this load to [`PluginLoader::release`]
    pub fn load_id(&self) -> u64 {
        self.load_id
    }

    /// Name of the load context the module lives in
    pub fn context_name(&self) -> &str {
        &self.context
    }

    pub fn module_id(&self) -> &str {
        self.module.id()
    }
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("type_name", &self.instance.type_name())
            .field("module", &self.module.id())
            .field("context", &self.context)
            .field("load_id", &self.load_id)
            .finish()
    }
}

#[async_trait]
impl AgentPlugin for LoadedPlugin {
    fn descriptor(&self) -> PluginDescriptor {
        self.instance.descriptor()
    }

    fn type_name(&self) -> &'static str {
        self.instance.type_name()
    }

    fn routes(&self) -> Vec<MethodRoutingInfo> {
        self.instance.routes()
    }

    async fn initialize(&self, context: Arc<dyn AgentContext>) -> PluginResult<()> {
        self.instance.initialize(context).await
    }

    async fn execute_method(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value> {
        self.instance.execute_method(method_name, params).await
    }

    async fn handle_event(&self, event: AgentEvent) -> PluginResult<()> {
        self.instance.handle_event(event).await
    }

    async fn get_state(&self) -> PluginResult<Option<Value>> {
        self.instance.get_state().await
    }

    async fn set_state(&self, state: Option<Value>) -> PluginResult<()> {
        self.instance.set_state(state).await
    }

    async fn dispose(&self) -> PluginResult<()> {
        self.instance.dispose().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Loader
// ─────────────────────────────────────────────────────────────────────────────

/// Where one load of a plugin name put its module
#[derive(Debug, Clone)]
struct LoadRecord {
    load_id: u64,
    context: String,
    module_id: String,
}

pub struct PluginLoader {
    config: LoaderConfig,
    backends: Arc<[Arc<dyn ModuleBackend>]>,
    shared: Arc<LoadContext>,
    /// Live isolated contexts by name
    contexts: DashMap<String, Arc<LoadContext>>,
    /// Plugin name → loads to release on unload
    loads: DashMap<String, Vec<LoadRecord>>,
    /// Descriptors seen by discovery or loading, keyed `name:version`
    available: DashMap<String, PluginDescriptor>,
    next_load: AtomicU64,
}

impl PluginLoader {
    pub fn new(config: LoaderConfig, backends: Vec<Arc<dyn ModuleBackend>>) -> Self {
        let shared = Arc::new(LoadContext::shared(&config.shadow_dir));
        Self {
            config,
            backends: backends.into(),
            shared,
            contexts: DashMap::new(),
            loads: DashMap::new(),
            available: DashMap::new(),
            next_load: AtomicU64::new(1),
        }
    }

    /// Loader with the native shared-library backend only
    pub fn native(config: LoaderConfig) -> Self {
        Self::new(config, vec![Arc::new(NativeModuleBackend::new())])
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a plugin from the bytes of a loadable unit
    ///
    /// With `type_name` set, the export matching that name (fully-qualified
    /// or bare) is instantiated; otherwise the module must export exactly one
    /// plugin type.
    pub async fn load_from_bytes(
        &self,
        bytes: &[u8],
        type_name: Option<&str>,
    ) -> PluginResult<Arc<LoadedPlugin>> {
        let label = type_name.unwrap_or("<unnamed>").to_string();
        let context = if self.config.isolate_in_separate_context {
            Arc::new(LoadContext::isolated(&self.config.shadow_dir))
        } else {
            Arc::clone(&self.shared)
        };

        let backends = Arc::clone(&self.backends);
        let task_context = Arc::clone(&context);
        let bytes = bytes.to_vec();
        let requested = type_name.map(str::to_string);
        let task = tokio::task::spawn_blocking(move || {
            instantiate(&backends, &task_context, &bytes, requested.as_deref())
        });

        let mut loaded = match tokio::time::timeout(self.config.load_timeout, task).await {
            Err(_) => {
                return Err(PluginError::load(
                    &label,
                    format!("load timed out after {:?}", self.config.load_timeout),
                ));
            }
            Ok(Err(join_error)) => {
                return Err(PluginError::load(&label, format!("load task failed: {}", join_error)));
            }
            Ok(Ok(result)) => result.map_err(|reason| PluginError::load(&label, reason))?,
        };

        loaded.load_id = self.next_load.fetch_add(1, Ordering::Relaxed);
        let descriptor = loaded.descriptor();
        if context.name() != DEFAULT_CONTEXT {
            self.contexts
                .insert(context.name().to_string(), Arc::clone(&context));
        }
        self.loads
            .entry(descriptor.name.clone())
            .or_default()
            .push(LoadRecord {
                load_id: loaded.load_id,
                context: context.name().to_string(),
                module_id: loaded.module_id().to_string(),
            });
        self.available.insert(descriptor.key(), descriptor.clone());

        tracing::info!(
            plugin = %descriptor.name,
            version = descriptor.version.as_deref().unwrap_or("-"),
            type_name = loaded.type_name(),
            context = %context.name(),
            "Plugin loaded"
        );

        Ok(Arc::new(loaded))
    }

    /// Load a plugin from a file
    pub async fn load_from_path(
        &self,
        path: impl AsRef<Path>,
        type_name: Option<&str>,
    ) -> PluginResult<Arc<LoadedPlugin>> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(PluginError::FileNotFound(path.to_path_buf()));
        }

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PluginError::load(path.display().to_string(), e.to_string()))?;
        self.load_from_bytes(&bytes, type_name).await
    }

    /// Load a plugin by name using the discovery layout
    ///
    /// With a version, `<dir>/<Name>/<version>/<Name>.<ext>` is tried before
    /// `<dir>/<Name>/<Name>.<ext>`.
    pub async fn load_plugin(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> PluginResult<Arc<LoadedPlugin>> {
        let key = plugin_types::plugin_key(name, version);
        let path = self
            .candidate_paths(name, version)
            .into_iter()
            .find(|path| path.is_file())
            .ok_or_else(|| {
                PluginError::load(
                    &key,
                    format!("not found in {}", self.config.plugins_dir.display()),
                )
            })?;

        tracing::debug!(plugin = %key, path = %path.display(), "Resolved plugin module");
        let loaded = self.load_from_path(&path, None).await?;

        let descriptor = loaded.descriptor();
        if version.is_some() && descriptor.version.as_deref() != version {
            tracing::warn!(
                plugin = %key,
                loaded_version = descriptor.version.as_deref().unwrap_or("-"),
                "Loaded plugin version differs from the requested one"
            );
        }
        Ok(loaded)
    }

    fn candidate_paths(&self, name: &str, version: Option<&str>) -> Vec<PathBuf> {
        let plugin_dir = self.config.plugins_dir.join(name);
        let mut dirs = Vec::new();
        if let Some(version) = version {
            dirs.push(plugin_dir.join(version));
        }
        dirs.push(plugin_dir);

        dirs.iter()
            .flat_map(|dir| {
                self.backends
                    .iter()
                    .map(move |backend| dir.join(format!("{}.{}", name, backend.extension())))
            })
            .collect()
    }

    /// Scan the plugin directory and describe every plugin type found
    ///
    /// No plugin factory is called. Entries that cannot be read or opened
    /// are logged and skipped.
    pub async fn discover(&self) -> PluginResult<Vec<PluginDescriptor>> {
        let plugins_dir = self.config.plugins_dir.clone();
        let shadow_root = self.config.shadow_dir.join("discovery");
        let backends = Arc::clone(&self.backends);

        let descriptors = tokio::task::spawn_blocking(move || {
            scan_plugins_dir(&plugins_dir, &shadow_root, &backends)
        })
        .await
        .map_err(|e| PluginError::load("<discovery>", e.to_string()))?;

        for descriptor in &descriptors {
            self.available.insert(descriptor.key(), descriptor.clone());
        }
        tracing::info!(count = descriptors.len(), "Plugin discovery complete");
        Ok(descriptors)
    }

    /// Descriptors seen so far, sorted by key
    pub fn available(&self) -> Vec<PluginDescriptor> {
        let mut all: Vec<_> = self
            .available
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|d| d.key());
        all
    }

    /// Release the load contexts of a plugin name
    ///
    /// Modules stay mapped until the last instance created from them is
    /// dropped. Unknown names are ignored.
    pub fn unload(&self, name: &str) {
        let Some((_, records)) = self.loads.remove(name) else {
            tracing::debug!(plugin = %name, "Nothing to unload");
            return;
        };

        for record in records {
            self.drop_record(&record);
        }
        tracing::info!(plugin = %name, "Plugin unloaded");
    }

    /// Release the load a single instance came from
    ///
    /// Other loads of the same plugin name are untouched. Releasing twice,
    /// or after `unload`, does nothing.
    pub fn release(&self, loaded: &LoadedPlugin) {
        let name = loaded.descriptor().name;
        let record = self.loads.get_mut(&name).and_then(|mut records| {
            let index = records.iter().position(|r| r.load_id == loaded.load_id)?;
            Some(records.remove(index))
        });
        self.loads.remove_if(&name, |_, records| records.is_empty());

        match record {
            Some(record) => {
                self.drop_record(&record);
                tracing::debug!(
                    plugin = %name,
                    load_id = record.load_id,
                    context = %record.context,
                    "Plugin load released"
                );
            }
            None => tracing::debug!(plugin = %name, "Load already released"),
        }
    }

    fn drop_record(&self, record: &LoadRecord) {
        if record.context != DEFAULT_CONTEXT {
            self.contexts.remove(&record.context);
            return;
        }
        // A shared module stays cached while another load still uses it
        let in_use = self.loads.iter().any(|entry| {
            entry
                .value()
                .iter()
                .any(|r| r.context == DEFAULT_CONTEXT && r.module_id == record.module_id)
        });
        if !in_use {
            self.shared.evict(&record.module_id);
        }
    }

    /// Number of live isolated load contexts
    pub fn context_count(&self) -> usize {
        self.contexts.len()
    }
}

impl std::fmt::Debug for PluginLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLoader")
            .field("config", &self.config)
            .field("backends", &self.backends.len())
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Blocking Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn select_backend<'a>(
    backends: &'a [Arc<dyn ModuleBackend>],
    bytes: &[u8],
) -> Result<&'a dyn ModuleBackend, String> {
    backends
        .iter()
        .find(|backend| backend.recognizes(bytes))
        .map(|backend| backend.as_ref())
        .ok_or_else(|| "not a loadable module".to_string())
}

fn resolve_export<'a>(
    decl: &'a PluginModuleDecl,
    type_name: Option<&str>,
) -> Result<&'a PluginExport, String> {
    match type_name {
        None => match decl.exports {
            [] => Err("module exports no plugin types".to_string()),
            [only] => Ok(only),
            many => Err(format!(
                "module exports {} plugin types; a type name is required",
                many.len()
            )),
        },
        Some(requested) => {
            let mut matches = decl.exports.iter().filter(|e| e.matches(requested));
            match (matches.next(), matches.next()) {
                (Some(export), None) => Ok(export),
                (Some(_), Some(_)) => Err(format!("type name {} is ambiguous", requested)),
                (None, _) => Err(format!("type {} not found in module", requested)),
            }
        }
    }
}

fn instantiate(
    backends: &[Arc<dyn ModuleBackend>],
    context: &LoadContext,
    bytes: &[u8],
    type_name: Option<&str>,
) -> Result<LoadedPlugin, String> {
    let backend = select_backend(backends, bytes)?;
    let module = context.open(backend, bytes).map_err(|e| e.to_string())?;
    let export = resolve_export(module.decl(), type_name)?;
    let instance = (export.create)();

    Ok(LoadedPlugin {
        instance,
        module,
        context: context.name().to_string(),
        load_id: 0,
    })
}

fn scan_plugins_dir(
    plugins_dir: &Path,
    shadow_root: &Path,
    backends: &[Arc<dyn ModuleBackend>],
) -> Vec<PluginDescriptor> {
    let entries = match std::fs::read_dir(plugins_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(
                dir = %plugins_dir.display(),
                error = %e,
                "Cannot read plugin directory"
            );
            return Vec::new();
        }
    };

    let mut units = Vec::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };

        let mut dirs = vec![dir.clone()];
        if let Ok(children) = std::fs::read_dir(&dir) {
            dirs.extend(children.flatten().map(|c| c.path()).filter(|p| p.is_dir()));
        }
        for dir in dirs {
            for backend in backends {
                let path = dir.join(format!("{}.{}", name, backend.extension()));
                if path.is_file() {
                    units.push(path);
                }
            }
        }
    }
    units.sort();

    let scratch = LoadContext::isolated(shadow_root);
    let mut descriptors = Vec::new();
    for path in units {
        match describe_unit(&path, &scratch, backends) {
            Ok(found) => descriptors.extend(found),
            Err(reason) => {
                tracing::warn!(path = %path.display(), reason = %reason, "Skipping plugin module");
            }
        }
    }
    descriptors
}

fn describe_unit(
    path: &Path,
    scratch: &LoadContext,
    backends: &[Arc<dyn ModuleBackend>],
) -> Result<Vec<PluginDescriptor>, String> {
    let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
    let backend = select_backend(backends, &bytes)?;
    let module = scratch.open(backend, &bytes).map_err(|e| e.to_string())?;
    Ok(module
        .decl()
        .exports
        .iter()
        .map(|export| (export.descriptor)())
        .collect())
}
