//! agentd configuration
//!
//! Layered with figment: built-in defaults, then the TOML file, then
//! `AGENTD_` environment variables (`AGENTD_LOADER__PLUGINS_DIR=...`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use plugin_runtime::{HostConfig, LoaderConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_CONFIG_FILE: &str = "agentd.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentdConfig {
    pub loader: LoaderConfig,
    pub host: HostConfig,
    pub journal: JournalConfig,
    pub log: LogConfig,
    /// Agents started by `agentd serve`
    pub agents: Vec<AgentConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Directory of per-host journals; in-memory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    pub filter: Option<String>,
}

/// One hosted agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub plugin: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub config: Option<Map<String, Value>>,
}

impl AgentdConfig {
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(AgentdConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("AGENTD_").split("__"))
    }

    /// Load configuration; a missing file leaves the defaults in place
    pub fn load(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentdConfig::load(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.loader.plugins_dir, PathBuf::from("plugins"));
        assert!(config.loader.isolate_in_separate_context);
        assert!(config.journal.path.is_none());
        assert_eq!(config.log.format, LogFormat::Pretty);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentd.toml");
        std::fs::write(
            &path,
            r#"
            [loader]
            plugins_dir = "/srv/plugins"
            load_timeout = 500

            [host]
            response_timeout = 2000

            [journal]
            path = "/var/lib/agentd"

            [log]
            format = "json"

            [[agents]]
            id = "station"
            plugin = "Weather"
            config = { unit = "fahrenheit" }

            [[agents]]
            id = "counter"
            plugin = "Counter"
            version = "2.0"
            "#,
        )
        .unwrap();

        let config = AgentdConfig::load(&path).unwrap();
        assert_eq!(config.loader.plugins_dir, PathBuf::from("/srv/plugins"));
        assert_eq!(config.loader.load_timeout, Duration::from_millis(500));
        assert_eq!(config.host.response_timeout, Duration::from_secs(2));
        assert_eq!(config.host.mailbox_capacity, HostConfig::default().mailbox_capacity);
        assert_eq!(config.journal.path, Some(PathBuf::from("/var/lib/agentd")));
        assert_eq!(config.log.format, LogFormat::Json);

        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].config.as_ref().unwrap()["unit"], "fahrenheit");
        assert_eq!(config.agents[1].version.as_deref(), Some("2.0"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentd.toml");
        std::fs::write(&path, "[log]\nformat = \"xml\"\n").unwrap();

        assert!(AgentdConfig::load(&path).is_err());
    }
}
