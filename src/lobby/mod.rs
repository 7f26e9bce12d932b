//! Session lifecycle
//!
//! Sessions, their tick loops and the registry that owns them.

pub mod outbound;
pub mod registry;
pub mod session;
pub mod ticker;
