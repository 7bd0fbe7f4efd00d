//! Entity schema registry
//!
//! Static, declarative description of every entity type the loader knows
//! about. Changing load order or reference semantics only ever means editing
//! descriptors here (or in a schema file), never the load algorithm.

pub mod catalog;
mod descriptor;
mod file;
mod registry;

pub use catalog::{builtin_descriptors, builtin_registry};
pub use descriptor::*;
pub use file::{load_schema_file, parse_schema, render_schema};
pub use registry::{SchemaError, SchemaRegistry};
