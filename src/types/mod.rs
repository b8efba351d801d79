//! Type definitions

pub mod contact;
pub mod import;
pub mod messages;

pub use contact::*;
pub use import::*;
pub use messages::*;
