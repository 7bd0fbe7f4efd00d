//! Staging sources
//!
//! A staging source turns a tabular export (one table per entity type)
//! into [`StagedData`]. Tables are matched to registered entity types by
//! name; columns are matched to descriptor fields by header.

mod csv_dir;
mod workbook;

pub use csv_dir::CsvDirectorySource;
pub use workbook::WorkbookSource;

use anyhow::Result;

use crate::schema::{EntityTypeDescriptor, FieldKind, SchemaRegistry};

use super::types::{StagedData, Value};

/// Produces staged records for a run
pub trait StagingSource {
    /// Read every table that names a registered entity type
    fn load(&self, registry: &SchemaRegistry) -> Result<StagedData>;

    /// Short description for logs, e.g. the file path
    fn describe(&self) -> String;
}

/// Map header cells to descriptor field names.
///
/// `_`-prefixed and blank headers are metadata and ignored silently;
/// headers naming no declared field are ignored with a warning.
fn map_columns(descriptor: &EntityTypeDescriptor, headers: &[String]) -> Vec<Option<String>> {
    headers
        .iter()
        .map(|header| {
            let header = header.trim();
            if header.is_empty() || header.starts_with('_') {
                return None;
            }
            if !descriptor.has_field(header) {
                log::warn!(
                    "{}: column '{}' is not a declared field, ignoring it",
                    descriptor.name,
                    header
                );
                return None;
            }
            Some(header.to_string())
        })
        .collect()
}

/// Add one row to the staged data, skipping rows with no values at all.
///
/// Text `true`/`false` becomes a boolean only in fields declared boolean.
fn push_row(
    staged: &mut StagedData,
    descriptor: &EntityTypeDescriptor,
    columns: &[Option<String>],
    values: impl IntoIterator<Item = Value>,
) -> bool {
    let fields: Vec<(String, Value)> = columns
        .iter()
        .zip(values)
        .filter_map(|(column, value)| column.as_ref().map(|name| (name.clone(), value)))
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| {
            let value = match descriptor.field(&name).map(|f| f.kind) {
                Some(FieldKind::Boolean) => text_to_bool(value),
                _ => value,
            };
            (name, value)
        })
        .collect();

    if fields.is_empty() {
        return false;
    }
    staged.push(&descriptor.name, fields);
    true
}

fn text_to_bool(value: Value) -> Value {
    let Value::String(text) = &value else {
        return value;
    };
    match text.trim().to_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => value,
    }
}
