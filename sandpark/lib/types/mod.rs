//! Entity types.
//!
//! The entity graph is Playground 1-N Session, Session 1-N Instance,
//! Session 0-1 User. Relationships are carried by id only: the one live
//! collection is a session's instance list, and everything else is a lookup
//! against storage. Entities never hold live back-pointers.

mod instance;
mod playground;
mod session;
mod user;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use instance::*;
pub use playground::*;
pub use session::*;
pub use user::*;
