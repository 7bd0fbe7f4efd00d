//! TOML schema files
//!
//! A schema file is a list of `[[entity]]` tables, each with nested
//! `[[entity.field]]` tables. Registration order follows file order.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::descriptor::EntityTypeDescriptor;
use super::registry::SchemaRegistry;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SchemaFile {
    #[serde(rename = "entity", default)]
    entities: Vec<EntityTypeDescriptor>,
}

/// Parse a schema from TOML text
pub fn parse_schema(content: &str) -> Result<SchemaRegistry> {
    let file: SchemaFile = toml::from_str(content).context("Failed to parse schema TOML")?;
    let registry = SchemaRegistry::from_descriptors(file.entities)?;
    Ok(registry)
}

/// Load a schema file from disk
pub fn load_schema_file<P: AsRef<Path>>(path: P) -> Result<SchemaRegistry> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema file: {}", path.display()))?;
    parse_schema(&content).with_context(|| format!("Invalid schema file: {}", path.display()))
}

/// Render a registry back to TOML (used by `plan --dump-schema`)
pub fn render_schema(registry: &SchemaRegistry) -> Result<String> {
    let file = SchemaFile {
        entities: registry.all_types().to_vec(),
    };
    toml::to_string(&file).context("Failed to render schema TOML")
}
