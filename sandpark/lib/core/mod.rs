//! The entity authority.
//!
//! The core is the single mutator of the entity graph, the orchestrator of
//! the provisioners and the publisher of lifecycle events. Everything else
//! (probers, the HTTP adapter) consumes it.

mod cancel;
#[allow(clippy::module_inception)]
mod core;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use cancel::*;
pub use core::*;
