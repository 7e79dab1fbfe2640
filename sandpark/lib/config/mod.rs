//! Configuration types and helpers.

mod config;
mod defaults;
mod routing;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::*;
pub use defaults::*;
pub use routing::*;
