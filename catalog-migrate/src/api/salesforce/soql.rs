//! SOQL rendering for natural key lookups

use crate::schema::{EntityTypeDescriptor, FieldKind};
use crate::transfer::{NaturalKey, Value};

/// Escape a string for use inside a single-quoted SOQL literal
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Render one key part as a literal of the field's kind.
///
/// Numbers and booleans go in bare when they parse, anything else is quoted.
pub fn render_literal(kind: FieldKind, part: &str) -> String {
    match kind {
        FieldKind::Number if part.parse::<f64>().is_ok() => part.to_string(),
        FieldKind::Boolean if part == "true" || part == "false" => part.to_string(),
        _ => format!("'{}'", escape_literal(part)),
    }
}

/// `SELECT Id, <key fields> FROM <type> WHERE <key match>`
///
/// Single-field keys use `IN (...)`; composite keys OR together one
/// parenthesised conjunction per key.
pub fn key_lookup_query(descriptor: &EntityTypeDescriptor, keys: &[NaturalKey]) -> String {
    let kinds: Vec<FieldKind> = descriptor
        .natural_key
        .iter()
        .map(|name| descriptor.field(name).map(|f| f.kind).unwrap_or_default())
        .collect();

    let mut select = vec!["Id".to_string()];
    select.extend(descriptor.natural_key.iter().cloned());

    let condition = if let [field] = descriptor.natural_key.as_slice() {
        let values: Vec<String> = keys
            .iter()
            .filter_map(|key| key.parts().first())
            .map(|part| render_literal(kinds[0], part))
            .collect();
        format!("{} IN ({})", field, values.join(", "))
    } else {
        keys.iter()
            .map(|key| {
                let terms: Vec<String> = descriptor
                    .natural_key
                    .iter()
                    .zip(key.parts())
                    .zip(&kinds)
                    .map(|((field, part), kind)| format!("{} = {}", field, render_literal(*kind, part)))
                    .collect();
                format!("({})", terms.join(" AND "))
            })
            .collect::<Vec<_>>()
            .join(" OR ")
    };

    format!(
        "SELECT {} FROM {} WHERE {}",
        select.join(", "),
        descriptor.name,
        condition
    )
}

/// Natural key of a record returned by a lookup query
pub fn key_from_row(descriptor: &EntityTypeDescriptor, row: &serde_json::Value) -> Option<NaturalKey> {
    let object = row.as_object()?;
    NaturalKey::collect(
        descriptor
            .natural_key
            .iter()
            .map(|name| object.get(name).map(Value::from_json).and_then(|v| v.key_part())),
    )
}
