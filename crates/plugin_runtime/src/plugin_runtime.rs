//! Plugin Runtime - Loading, routing and hosting of agent plugins
//!
//! This crate contains:
//! - `loader`: resolves loadable units into plugin instances
//! - `registry` / `router`: agent id → plugin map and per-plugin routing tables
//! - `adapter`: projects a plugin onto a target actor interface
//! - `context` / `reference`: capabilities handed to plugins
//! - `host`: the identity-bearing actor owning one plugin's lifecycle
//! - `substrate`: the pieces of the surrounding actor runtime the core talks to

pub use plugin_types;

pub mod adapter;
pub mod config;
pub mod context;
pub mod host;
pub mod loader;
pub mod reference;
pub mod registry;
pub mod router;
pub mod substrate;

#[cfg(test)]
mod test_support;

pub use adapter::*;
pub use config::*;
pub use context::*;
pub use host::*;
pub use loader::*;
pub use reference::*;
pub use registry::*;
pub use router::*;
pub use substrate::*;
