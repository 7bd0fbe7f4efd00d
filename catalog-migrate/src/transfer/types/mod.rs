//! Core types for catalog loading

mod identity;
mod key;
mod resolved;
mod staged;
mod value;

pub use identity::*;
pub use key::*;
pub use resolved::*;
pub use staged::*;
pub use value::*;
