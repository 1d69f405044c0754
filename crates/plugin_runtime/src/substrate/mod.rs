//! Actor substrate
//!
//! The pieces of the surrounding runtime that contexts, references and hosts
//! talk to: the event stream, correlated responses, agent topology, the
//! directory of addressable actors, shared services and durable host logs.

mod bus;
mod correlation;
mod directory;
mod journal;
mod services;
mod topology;

pub use bus::*;
pub use correlation::*;
pub use directory::*;
pub use journal::*;
pub use services::*;
pub use topology::*;
