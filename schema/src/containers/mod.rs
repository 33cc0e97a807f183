//! Identity-preserving containers.

mod list;
mod map;

pub use list::{ListRef, ListValue};
pub use map::{MapRef, MapValue};
