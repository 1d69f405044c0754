//! Loadable module declaration
//!
//! Every loadable unit exposes one `PluginModuleDecl`. Native modules export it
//! as the `AGENT_PLUGIN_MODULE` symbol via [`export_plugin_module!`]; modules
//! linked into the host are declared with [`plugin_module!`] and handed to the
//! static backend directly.
//!
//! The declaration carries Rust types, so host and plugin must be built by the
//! same compiler against the same SDK. The loader checks `abi_version` and
//! `sdk_version` before touching anything else.

use crate::{AgentPlugin, PluginDescriptor};

/// Bumped whenever the layout of the types below changes
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// SDK version a module was built against
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exported symbol name of the module declaration
pub const MODULE_SYMBOL: &[u8] = b"AGENT_PLUGIN_MODULE\0";

/// One plugin type exported by a module
pub struct PluginExport {
    /// Fully-qualified type name
    pub type_name: &'static str,

    /// Descriptor without instantiating the plugin
    pub descriptor: fn() -> PluginDescriptor,

    /// Factory for a fresh instance
    pub create: fn() -> Box<dyn AgentPlugin>,
}

impl PluginExport {
    /// Whether this export answers to a requested type name
    ///
    /// Accepts the fully-qualified name or the bare type name.
    pub fn matches(&self, requested: &str) -> bool {
        self.type_name == requested
            || self
                .type_name
                .rsplit("::")
                .next()
                .is_some_and(|short| short == requested)
    }
}

impl std::fmt::Debug for PluginExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginExport")
            .field("type_name", &self.type_name)
            .finish()
    }
}

/// Declaration of every plugin type in a module
#[derive(Debug)]
pub struct PluginModuleDecl {
    pub abi_version: u32,
    pub sdk_version: &'static str,
    pub exports: &'static [PluginExport],
}

impl PluginModuleDecl {
    /// Check that the module was built against a compatible SDK
    pub fn check_compatible(&self) -> Result<(), String> {
        if self.abi_version != PLUGIN_ABI_VERSION {
            return Err(format!(
                "plugin ABI version mismatch: module {}, host {}",
                self.abi_version, PLUGIN_ABI_VERSION
            ));
        }
        if self.sdk_version != SDK_VERSION {
            return Err(format!(
                "plugin SDK version mismatch: module {}, host {}",
                self.sdk_version, SDK_VERSION
            ));
        }
        Ok(())
    }
}

/// Build a [`PluginModuleDecl`] value
///
/// ```ignore
/// pub static WEATHER: PluginModuleDecl = plugin_module![WeatherPlugin => WeatherPlugin::default];
/// ```
#[macro_export]
macro_rules! plugin_module {
    ($($plugin:ty => $ctor:expr),+ $(,)?) => {
        $crate::PluginModuleDecl {
            abi_version: $crate::PLUGIN_ABI_VERSION,
            sdk_version: $crate::SDK_VERSION,
            exports: &[
                $(
                    $crate::PluginExport {
                        type_name: <$plugin as $crate::PluginType>::TYPE_NAME,
                        descriptor: <$plugin as $crate::PluginType>::plugin_descriptor,
                        create: {
                            fn create() -> ::std::boxed::Box<dyn $crate::AgentPlugin> {
                                let plugin: $plugin = ($ctor)();
                                ::std::boxed::Box::new(plugin)
                            }
                            create
                        },
                    }
                ),+
            ],
        }
    };
}

/// Export the module declaration of a native plugin library
///
/// Use once per `cdylib`:
///
/// ```ignore
/// plugin_types::export_plugin_module!(WeatherPlugin => WeatherPlugin::default);
/// ```
#[macro_export]
macro_rules! export_plugin_module {
    ($($plugin:ty => $ctor:expr),+ $(,)?) => {
        #[unsafe(no_mangle)]
        pub static AGENT_PLUGIN_MODULE: $crate::PluginModuleDecl =
            $crate::plugin_module![$($plugin => $ctor),+];
    };
}
