//! Plugin Types - The contract between agent plugins and the hosting runtime
//!
//! This crate is what a plugin links against. It defines:
//! - The plugin contract (`AgentPlugin`, `PluginLifecycle`)
//! - Descriptors and routing metadata produced by `#[agent_plugin]`
//! - The capability traits a plugin receives at initialization
//!   (`AgentContext`, `AgentReference`)
//! - Actor interface traits used by the adapter generator
//! - The native module declaration exported by loadable units

extern crate self as plugin_types;

mod agent;
mod coerce;
mod descriptor;
mod error;
mod event;
mod interface;
mod module;
mod plugin;

pub use agent::*;
pub use coerce::*;
pub use descriptor::*;
pub use error::*;
pub use event::*;
pub use interface::*;
pub use module::*;
pub use plugin::*;

pub use async_trait::async_trait;
pub use plugin_macros::{agent_interface, agent_plugin};
pub use serde_json;
pub use tokio_util::sync::CancellationToken;
