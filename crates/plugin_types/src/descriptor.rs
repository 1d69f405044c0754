//! Plugin descriptors and routing metadata
//!
//! Both are produced at compile time by `#[agent_plugin]` and read once by the
//! runtime when a plugin is registered.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Descriptor
// ─────────────────────────────────────────────────────────────────────────────

/// Identity and capability metadata for a plugin type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Plugin name, also the discovery directory name
    pub name: String,

    /// Optional plugin version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Capabilities in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<(String, Value)>,
}

impl PluginDescriptor {
    /// Create a descriptor with just a name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: String::new(),
            capabilities: Vec::new(),
        }
    }

    /// Set the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a capability, replacing an existing entry with the same key in place
    pub fn with_capability(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.capabilities.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.capabilities.push((key, value)),
        }
        self
    }

    /// Look up a capability value
    pub fn capability(&self, key: &str) -> Option<&Value> {
        self.capabilities
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// Catalog key (`name:version`, version omitted when absent)
    pub fn key(&self) -> String {
        plugin_key(&self.name, self.version.as_deref())
    }
}

/// Catalog key for a plugin name and optional version
pub fn plugin_key(name: &str, version: Option<&str>) -> String {
    match version {
        Some(v) if !v.is_empty() => format!("{}:{}", name, v),
        _ => name.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Type Info
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse value kind used for parameter coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Unit,
    Bool,
    Integer,
    Unsigned,
    Float,
    String,
    Optional,
    Sequence,
    Json,
}

/// A declared parameter or return type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Rust type as written
    pub name: String,
    pub kind: ValueKind,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn unit() -> Self {
        Self::new("()", ValueKind::Unit)
    }

    pub fn json() -> Self {
        Self::new("Value", ValueKind::Json)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling Hints
// ─────────────────────────────────────────────────────────────────────────────

/// Per-method markers consulted by the host scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulingHints {
    /// Non-mutating; may run concurrently with other read-only calls
    pub read_only: bool,
    /// May run concurrently with anything
    pub always_interleave: bool,
    /// Caller does not await completion
    pub one_way: bool,
}

impl SchedulingHints {
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn always_interleave() -> Self {
        Self {
            always_interleave: true,
            ..Default::default()
        }
    }

    pub fn one_way() -> Self {
        Self {
            one_way: true,
            ..Default::default()
        }
    }

    /// True when no marker is set
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Method Routing Info
// ─────────────────────────────────────────────────────────────────────────────

/// One entry of a plugin's routing table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRoutingInfo {
    /// Routing key
    pub method_name: String,

    /// Name of the Rust method behind the entry; also accepted as a routing key
    pub handler_name: String,

    pub return_type: TypeInfo,

    /// Positional parameter types
    pub parameter_types: Vec<TypeInfo>,

    pub is_read_only: bool,
    pub always_interleave: bool,
    pub one_way: bool,
}

impl MethodRoutingInfo {
    /// Create an entry with no parameters, a JSON return type and no hints
    pub fn new(method_name: impl Into<String>) -> Self {
        let method_name = method_name.into();
        Self {
            handler_name: method_name.clone(),
            method_name,
            return_type: TypeInfo::json(),
            parameter_types: Vec::new(),
            is_read_only: false,
            always_interleave: false,
            one_way: false,
        }
    }

    pub fn with_parameters(mut self, parameter_types: Vec<TypeInfo>) -> Self {
        self.parameter_types = parameter_types;
        self
    }

    pub fn with_return_type(mut self, return_type: TypeInfo) -> Self {
        self.return_type = return_type;
        self
    }

    pub fn with_hints(mut self, hints: SchedulingHints) -> Self {
        self.is_read_only = hints.read_only;
        self.always_interleave = hints.always_interleave;
        self.one_way = hints.one_way;
        self
    }

    /// Scheduling markers of this entry
    pub fn hints(&self) -> SchedulingHints {
        SchedulingHints {
            read_only: self.is_read_only,
            always_interleave: self.always_interleave,
            one_way: self.one_way,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capabilities_keep_declaration_order() {
        let descriptor = PluginDescriptor::new("Weather")
            .with_capability("streaming", true)
            .with_capability("batch", 10)
            .with_capability("streaming", false);

        let keys: Vec<_> = descriptor.capabilities.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["streaming", "batch"]);
        assert_eq!(descriptor.capability("streaming"), Some(&json!(false)));
    }

    #[test]
    fn test_plugin_key() {
        assert_eq!(PluginDescriptor::new("P").with_version("1.0").key(), "P:1.0");
        assert_eq!(PluginDescriptor::new("P").key(), "P");
    }

    #[test]
    fn test_routing_info_hints() {
        let info = MethodRoutingInfo::new("read").with_hints(SchedulingHints::read_only());
        assert!(info.is_read_only);
        assert!(!info.always_interleave);
        assert_eq!(info.hints(), SchedulingHints::read_only());
    }
}
