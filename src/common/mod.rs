//! Miscellaneous common structs used throughout the library.

mod id;
pub mod messages;
mod tracker;

pub use id::*;
pub use messages::*;
pub use tracker::*;
