//! Host state
//!
//! `PluginHostState` is the durable part of a host. It only changes by
//! applying `HostLogEntry` records, so replaying a host's journal rebuilds it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Host Phase
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle phase of a plugin host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HostPhase {
    /// No plugin configured
    Unconfigured = 0,
    /// Plugin configured, loaded on first use
    Configured = 1,
    /// Plugin loaded and initialized
    Loaded = 2,
    /// Plugin being replaced
    Reloading = 3,
    /// Host stopped; every operation fails
    Disposed = 4,
}

impl HostPhase {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Unconfigured,
            1 => Self::Configured,
            2 => Self::Loaded,
            3 => Self::Reloading,
            _ => Self::Disposed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        *self == HostPhase::Disposed
    }
}

impl std::fmt::Display for HostPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostPhase::Unconfigured => write!(f, "unconfigured"),
            HostPhase::Configured => write!(f, "configured"),
            HostPhase::Loaded => write!(f, "loaded"),
            HostPhase::Reloading => write!(f, "reloading"),
            HostPhase::Disposed => write!(f, "disposed"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log Entries
// ─────────────────────────────────────────────────────────────────────────────

/// One durable change to a host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostLogEntry {
    ConfigurationInitialized {
        plugin_name: String,
        plugin_version: Option<String>,
        configuration: Option<Map<String, Value>>,
    },
    PluginLoaded {
        loaded_at: DateTime<Utc>,
    },
    PluginReloaded {
        loaded_at: DateTime<Utc>,
    },
    PluginStateChanged {
        state: Option<Value>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Host State
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginHostState {
    pub plugin_name: Option<String>,
    pub plugin_version: Option<String>,
    pub configuration: Option<Map<String, Value>>,
    /// Last state written through the host
    pub plugin_state: Option<Value>,
    pub last_load_time: Option<DateTime<Utc>>,
}

impl PluginHostState {
    /// Rebuild state from a journal
    pub fn replay<'a>(entries: impl IntoIterator<Item = &'a HostLogEntry>) -> Self {
        let mut state = Self::default();
        for entry in entries {
            state.apply(entry);
        }
        state
    }

    pub fn apply(&mut self, entry: &HostLogEntry) {
        match entry {
            HostLogEntry::ConfigurationInitialized {
                plugin_name,
                plugin_version,
                configuration,
            } => {
                // State belongs to a plugin identity; only a new identity drops it
                if !self.is_same_plugin(plugin_name, plugin_version.as_deref()) {
                    self.plugin_state = None;
                }
                self.plugin_name = Some(plugin_name.clone());
                self.plugin_version = plugin_version.clone();
                self.configuration = configuration.clone();
            }
            HostLogEntry::PluginLoaded { loaded_at }
            | HostLogEntry::PluginReloaded { loaded_at } => {
                self.last_load_time = Some(*loaded_at);
            }
            HostLogEntry::PluginStateChanged { state } => {
                self.plugin_state = state.clone();
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.plugin_name.is_some()
    }

    /// Whether the configured plugin has this name and version
    pub fn is_same_plugin(&self, plugin_name: &str, plugin_version: Option<&str>) -> bool {
        self.plugin_name.as_deref() == Some(plugin_name)
            && self.plugin_version.as_deref() == plugin_version
    }
}
