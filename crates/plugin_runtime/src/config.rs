//! Runtime configuration
//!
//! Plain serde structs; the application decides where they are loaded from.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Plugin loader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Root of the `<Name>/<Name>.<ext>` discovery layout
    pub plugins_dir: PathBuf,

    /// Load every unit into its own load context
    pub isolate_in_separate_context: bool,

    /// Fixed deadline for a single load
    #[serde(with = "duration_millis")]
    pub load_timeout: Duration,

    /// Where native modules are shadow-copied before loading
    pub shadow_dir: PathBuf,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            isolate_in_separate_context: true,
            load_timeout: Duration::from_secs(30),
            shadow_dir: std::env::temp_dir().join("agent-plugins"),
        }
    }
}

impl LoaderConfig {
    pub fn new(plugins_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugins_dir: plugins_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_isolation(mut self, isolate: bool) -> Self {
        self.isolate_in_separate_context = isolate;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn with_shadow_dir(mut self, shadow_dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = shadow_dir.into();
        self
    }
}

/// Plugin host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Command mailbox size per host
    pub mailbox_capacity: usize,

    /// Capacity of the shared event bus
    pub event_buffer: usize,

    /// Default wait for correlated responses
    #[serde(with = "duration_millis")]
    pub response_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 256,
            event_buffer: 1024,
            response_timeout: plugin_types::DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Durations as integer milliseconds
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
