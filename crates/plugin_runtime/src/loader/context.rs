//! Load contexts
//!
//! A load context groups the modules opened together. Isolated loads get a
//! fresh context each; shared loads all go through the `default` context,
//! where byte-identical units resolve to the module already opened.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use super::backend::{LoadedModule, ModuleBackend, ModuleError};

/// Name of the context shared by non-isolated loads
pub const DEFAULT_CONTEXT: &str = "default";

pub struct LoadContext {
    name: String,
    shadow_dir: PathBuf,
    /// Content key → opened module
    modules: Mutex<HashMap<u64, Arc<LoadedModule>>>,
}

impl LoadContext {
    /// A fresh, uniquely named context
    pub fn isolated(shadow_root: &Path) -> Self {
        Self::named(format!("ctx-{}", uuid::Uuid::new_v4()), shadow_root)
    }

    /// The context shared by every non-isolated load
    pub fn shared(shadow_root: &Path) -> Self {
        Self::named(DEFAULT_CONTEXT.to_string(), shadow_root)
    }

    fn named(name: String, shadow_root: &Path) -> Self {
        let shadow_dir = shadow_root.join(&name);
        Self {
            name,
            shadow_dir,
            modules: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open a unit, reusing the module if identical bytes were opened before
    pub fn open(
        &self,
        backend: &dyn ModuleBackend,
        bytes: &[u8],
    ) -> Result<Arc<LoadedModule>, ModuleError> {
        let key = content_key(bytes);
        let mut modules = self.modules.lock();

        if let Some(module) = modules.get(&key) {
            tracing::debug!(context = %self.name, module = module.id(), "Reusing loaded module");
            return Ok(Arc::clone(module));
        }

        let module = Arc::new(backend.open(bytes, &self.shadow_dir)?);
        tracing::debug!(context = %self.name, module = module.id(), "Module opened");
        modules.insert(key, Arc::clone(&module));
        Ok(module)
    }

    /// Forget a module; it is released once no plugin instance uses it
    pub fn evict(&self, module_id: &str) -> bool {
        let mut modules = self.modules.lock();
        let before = modules.len();
        modules.retain(|_, module| module.id() != module_id);
        modules.len() != before
    }

    pub fn module_count(&self) -> usize {
        self.modules.lock().len()
    }
}

impl Drop for LoadContext {
    fn drop(&mut self) {
        tracing::debug!(context = %self.name, "Load context released");
        if self.name != DEFAULT_CONTEXT {
            // Modules still referenced by live plugins keep their own shadow
            // files; the directory is removed once empty.
            let _ = std::fs::remove_dir(&self.shadow_dir);
        }
    }
}

impl std::fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadContext")
            .field("name", &self.name)
            .field("modules", &self.module_count())
            .finish()
    }
}

fn content_key(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}
