//! Actor interfaces
//!
//! A target actor interface is a trait annotated with `#[agent_interface]`.
//! The macro generates an adapter type implementing the trait by forwarding
//! each method to a `MethodTarget`, and an `ActorInterface` impl for
//! `dyn Trait` that describes the methods and binds the adapter.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{PluginResult, SchedulingHints, TypeInfo};

/// One method of a target interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceMethod {
    /// Routing name the adapter forwards to
    pub name: String,

    /// Rust method name on the trait
    pub rust_name: String,

    /// Markers declared on the interface method
    pub hints: SchedulingHints,

    pub parameter_types: Vec<TypeInfo>,

    pub return_type: TypeInfo,
}

/// Shape of a target interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescriptor {
    /// Trait name
    pub name: String,
    pub methods: Vec<InterfaceMethod>,
}

impl InterfaceDescriptor {
    pub fn method(&self, name: &str) -> Option<&InterfaceMethod> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Destination of every adapter call
#[async_trait]
pub trait MethodTarget: Send + Sync {
    /// Hints the scheduler sees for a routing name
    fn scheduling_hints(&self, method_name: &str) -> SchedulingHints;

    async fn invoke(&self, method_name: &str, params: Vec<Value>) -> PluginResult<Value>;
}

/// Implemented for `dyn Trait` by `#[agent_interface]`
pub trait ActorInterface: 'static {
    fn descriptor() -> InterfaceDescriptor;

    /// Wrap a target in the generated adapter type
    fn bind(target: Arc<dyn MethodTarget>) -> Arc<Self>;
}
