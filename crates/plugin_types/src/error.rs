//! Plugin Errors
//!
//! A single error taxonomy shared by plugins and the runtime. The loader and
//! router raise the narrow kinds; agent references wrap them into
//! `AgentMethodCall` / `AgentEventSend` so callers can correlate by agent id.

use std::path::PathBuf;
use std::time::Duration;

/// Errors raised while loading, routing or invoking plugins
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("Failed to load plugin {plugin}: {reason}")]
    Load { plugin: String, reason: String },

    #[error("Plugin file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Method {method} expects {expected} parameter(s), got {actual}")]
    ParameterMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot convert {found} to {expected}")]
    Conversion { expected: String, found: String },

    #[error("Failed to generate adapter for {interface}: {reason}")]
    ProxyGeneration { interface: String, reason: String },

    #[error("Failed to generate method {interface}::{method}: {reason}")]
    MethodGeneration {
        interface: String,
        method: String,
        reason: String,
    },

    #[error("Error calling method {method} on agent {agent_id}: {source}")]
    AgentMethodCall {
        agent_id: String,
        method: String,
        source: Box<PluginError>,
    },

    #[error("Error sending event {event_type} to agent {agent_id}: {source}")]
    AgentEventSend {
        agent_id: String,
        event_type: String,
        source: Box<PluginError>,
    },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("Value cannot be null: {0}")]
    ArgumentNull(&'static str),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Journal error: {0}")]
    Journal(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Execution(String),
}

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

impl PluginError {
    /// Error raised from inside a plugin method body
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Error for a loader failure
    pub fn load(plugin: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Load {
            plugin: plugin.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a failure encountered while calling through an agent reference
    pub fn method_call(
        agent_id: impl Into<String>,
        method: impl Into<String>,
        source: PluginError,
    ) -> Self {
        Self::AgentMethodCall {
            agent_id: agent_id.into(),
            method: method.into(),
            source: Box::new(source),
        }
    }

    /// Wrap a failure encountered while delivering an event through an agent reference
    pub fn event_send(
        agent_id: impl Into<String>,
        event_type: impl Into<String>,
        source: PluginError,
    ) -> Self {
        Self::AgentEventSend {
            agent_id: agent_id.into(),
            event_type: event_type.into(),
            source: Box::new(source),
        }
    }

    /// The innermost cause, unwrapping agent-addressed wrappers
    pub fn root_cause(&self) -> &PluginError {
        match self {
            Self::AgentMethodCall { source, .. } | Self::AgentEventSend { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Whether this failure was caused by cancellation rather than processing
    pub fn is_cancellation(&self) -> bool {
        matches!(self.root_cause(), Self::Cancelled)
    }

    /// Whether the root cause is an unknown method
    pub fn is_method_not_found(&self) -> bool {
        matches!(self.root_cause(), Self::MethodNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_unwraps_nested_wrappers() {
        let err = PluginError::method_call(
            "agent-1",
            "ping",
            PluginError::event_send("agent-2", "Ping", PluginError::Cancelled),
        );

        assert!(err.is_cancellation());
        assert!(!err.is_method_not_found());
        assert!(matches!(err.root_cause(), PluginError::Cancelled));
    }

    #[test]
    fn test_wrapped_message_names_agent_and_method() {
        let err = PluginError::method_call(
            "agent-1",
            "ping",
            PluginError::MethodNotFound("ping".into()),
        );

        let message = err.to_string();
        assert!(message.contains("agent-1"));
        assert!(message.contains("ping"));
        assert!(err.is_method_not_found());
    }
}
