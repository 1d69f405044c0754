//! Module backends
//!
//! A backend turns the bytes of a loadable unit into a `LoadedModule` exposing
//! a `PluginModuleDecl`. Two backends exist:
//! - `NativeModuleBackend`: shared libraries, shadow-copied and opened with
//!   `libloading`
//! - `StaticModuleBackend`: modules linked into the host process, selected by
//!   a small `.agentmod` TOML file

use std::path::{Path, PathBuf};

use dashmap::DashMap;
use libloading::{Library, Symbol};
use plugin_types::{MODULE_SYMBOL, PluginModuleDecl};
use serde::Deserialize;

// ─────────────────────────────────────────────────────────────────────────────
// Module Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors opening a loadable unit
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Library error: {0}")]
    Library(#[from] libloading::Error),

    #[error("Invalid module manifest: {0}")]
    Manifest(#[from] toml::de::Error),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Incompatible module: {0}")]
    Incompatible(String),

    #[error("Bytes are not a loadable module")]
    NotAModule,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loaded Module
// ─────────────────────────────────────────────────────────────────────────────

/// An opened module
///
/// Dropping the last reference unloads the library and removes its shadow
/// copy; plugin instances hold an `Arc` to their module.
pub struct LoadedModule {
    id: String,
    decl: *const PluginModuleDecl,
    library: Option<Library>,
    shadow_path: Option<PathBuf>,
}

// SAFETY: `decl` points at immutable data that lives as long as `library`
// (or forever for static modules), and `Library` itself is Send + Sync.
unsafe impl Send for LoadedModule {}
unsafe impl Sync for LoadedModule {}

impl LoadedModule {
    /// Wrap a module linked into the host process
    pub fn from_static(id: impl Into<String>, decl: &'static PluginModuleDecl) -> Self {
        Self {
            id: id.into(),
            decl,
            library: None,
            shadow_path: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn decl(&self) -> &PluginModuleDecl {
        // SAFETY: see the Send/Sync impls; the pointer is valid while `self` lives.
        unsafe { &*self.decl }
    }

    pub fn is_native(&self) -> bool {
        self.library.is_some()
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                tracing::warn!(module = %self.id, error = %e, "Failed to close plugin library");
            }
        }
        if let Some(path) = self.shadow_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Failed to remove shadow copy");
            }
        }
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("id", &self.id)
            .field("native", &self.is_native())
            .field("exports", &self.decl().exports.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Strategy that opens one kind of loadable unit
pub trait ModuleBackend: Send + Sync {
    /// File extension used by the discovery layout, without the dot
    fn extension(&self) -> &str;

    /// Cheap check whether the bytes look like this backend's format
    fn recognizes(&self, bytes: &[u8]) -> bool;

    /// Open a unit; `shadow_dir` is private to the load context
    fn open(&self, bytes: &[u8], shadow_dir: &Path) -> Result<LoadedModule, ModuleError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Native Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Shared-library modules exporting `AGENT_PLUGIN_MODULE`
#[derive(Debug, Default)]
pub struct NativeModuleBackend;

impl NativeModuleBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleBackend for NativeModuleBackend {
    fn extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    fn recognizes(&self, bytes: &[u8]) -> bool {
        const MAGICS: &[&[u8]] = &[
            b"\x7fELF",
            b"MZ",
            &[0xfe, 0xed, 0xfa, 0xce],
            &[0xfe, 0xed, 0xfa, 0xcf],
            &[0xce, 0xfa, 0xed, 0xfe],
            &[0xcf, 0xfa, 0xed, 0xfe],
            &[0xca, 0xfe, 0xba, 0xbe],
        ];
        MAGICS.iter().any(|magic| bytes.starts_with(magic))
    }

    fn open(&self, bytes: &[u8], shadow_dir: &Path) -> Result<LoadedModule, ModuleError> {
        if !self.recognizes(bytes) {
            return Err(ModuleError::NotAModule);
        }

        // Each load gets its own file so the OS loader never shares a mapping
        // between load contexts.
        std::fs::create_dir_all(shadow_dir)?;
        let id = uuid::Uuid::new_v4().to_string();
        let shadow_path = shadow_dir.join(format!("{}.{}", id, self.extension()));
        std::fs::write(&shadow_path, bytes)?;

        match open_library(&shadow_path) {
            Ok((library, decl)) => Ok(LoadedModule {
                id,
                decl,
                library: Some(library),
                shadow_path: Some(shadow_path),
            }),
            Err(e) => {
                let _ = std::fs::remove_file(&shadow_path);
                Err(e)
            }
        }
    }
}

fn open_library(path: &Path) -> Result<(Library, *const PluginModuleDecl), ModuleError> {
    // SAFETY: Loading a library runs its initializers; plugin modules are
    // trusted code built against the same SDK.
    let library = unsafe { Library::new(path) }?;

    let decl = {
        // SAFETY: The symbol is a `static PluginModuleDecl` emitted by
        // `export_plugin_module!`; the pointer is checked below.
        let symbol: Symbol<*const PluginModuleDecl> = unsafe { library.get(MODULE_SYMBOL) }?;
        *symbol
    };
    if decl.is_null() {
        return Err(ModuleError::Incompatible("null module declaration".into()));
    }

    // SAFETY: Non-null and valid while `library` is loaded. `abi_version` is
    // the first field and is checked before anything else is read.
    unsafe { &*decl }
        .check_compatible()
        .map_err(ModuleError::Incompatible)?;

    Ok((library, decl))
}

// ─────────────────────────────────────────────────────────────────────────────
// Static Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Contents of a `.agentmod` unit
#[derive(Debug, Deserialize)]
struct StaticManifest {
    module: String,
}

/// Modules linked into the host process
///
/// A unit is a TOML document naming a registered module:
///
/// ```toml
/// module = "weather"
/// ```
#[derive(Default)]
pub struct StaticModuleBackend {
    modules: DashMap<String, &'static PluginModuleDecl>,
}

impl StaticModuleBackend {
    pub const EXTENSION: &'static str = "agentmod";

    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module under an id
    pub fn with_module(self, id: impl Into<String>, decl: &'static PluginModuleDecl) -> Self {
        self.register(id, decl);
        self
    }

    pub fn register(&self, id: impl Into<String>, decl: &'static PluginModuleDecl) {
        self.modules.insert(id.into(), decl);
    }

    /// Bytes of a unit selecting a registered module
    pub fn unit_for(id: &str) -> Vec<u8> {
        format!("module = {:?}\n", id).into_bytes()
    }
}

impl ModuleBackend for StaticModuleBackend {
    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn recognizes(&self, bytes: &[u8]) -> bool {
        std::str::from_utf8(bytes)
            .ok()
            .and_then(|text| toml::from_str::<StaticManifest>(text).ok())
            .is_some()
    }

    fn open(&self, bytes: &[u8], _shadow_dir: &Path) -> Result<LoadedModule, ModuleError> {
        let text = std::str::from_utf8(bytes).map_err(|_| ModuleError::NotAModule)?;
        let manifest: StaticManifest = toml::from_str(text)?;

        let decl = self
            .modules
            .get(&manifest.module)
            .map(|entry| *entry.value())
            .ok_or_else(|| ModuleError::UnknownModule(manifest.module.clone()))?;
        decl.check_compatible().map_err(ModuleError::Incompatible)?;

        Ok(LoadedModule::from_static(
            format!("static:{}", manifest.module),
            decl,
        ))
    }
}
