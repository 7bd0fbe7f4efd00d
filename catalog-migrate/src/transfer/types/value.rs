//! Field value representation for staged and resolved records

use serde::{Deserialize, Serialize};

/// Identifier assigned to a record by the target store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        TargetId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TargetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Placeholder for the id of a record created in the same batch, written `type:sequence`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SymbolicRef {
    pub entity_type: String,
    pub sequence: usize,
}

impl SymbolicRef {
    pub fn new(entity_type: impl Into<String>, sequence: usize) -> Self {
        SymbolicRef {
            entity_type: entity_type.into(),
            sequence,
        }
    }

    /// Parse a `type:sequence` token
    pub fn parse(token: &str) -> Option<Self> {
        let (entity_type, sequence) = token.rsplit_once(':')?;
        if entity_type.is_empty() {
            return None;
        }
        let sequence = sequence.parse().ok()?;
        Some(SymbolicRef::new(entity_type, sequence))
    }
}

impl std::fmt::Display for SymbolicRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.sequence)
    }
}

/// A field value. Staged records only carry the raw variants
/// (`Null`, `String`, `Int`, `Float`, `Bool`); resolution adds `Id` and `Ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    /// Null/empty value
    Null,
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Resolved reference to an existing target record
    Id(TargetId),
    /// Reference to a record created in the same batch
    Ref(SymbolicRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Null or a blank string
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; whole floats and numeric strings convert
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<&TargetId> {
        match self {
            Value::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn as_symbolic(&self) -> Option<&SymbolicRef> {
        match self {
            Value::Ref(token) => Some(token),
            _ => None,
        }
    }

    /// Normalized text of this value as one natural-key part.
    ///
    /// Strings are trimmed (case is kept), whole floats render as integers
    /// so `20.0` from a spreadsheet matches `20`. Null and blank values have
    /// no key part.
    pub fn key_part(&self) -> Option<String> {
        let part = match self {
            Value::Null => return None,
            Value::String(s) => s.trim().to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    (*f as i64).to_string()
                } else {
                    f.to_string()
                }
            }
            Value::Bool(b) => b.to_string(),
            Value::Id(id) => id.to_string(),
            Value::Ref(token) => token.to_string(),
        };
        if part.is_empty() { None } else { Some(part) }
    }

    /// Convert to JSON value for store payloads
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Int(i) => serde_json::json!(*i),
            Value::Float(f) => serde_json::json!(*f),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Id(id) => serde_json::Value::String(id.to_string()),
            Value::Ref(token) => serde_json::Value::String(token.to_string()),
        }
    }

    /// Parse from JSON value (store responses)
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                // Complex types not directly supported
                Value::String(json.to_string())
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "(null)"),
            Value::String(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Id(id) => write!(f, "{}", id),
            Value::Ref(token) => write!(f, "{}", token),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<TargetId> for Value {
    fn from(id: TargetId) -> Self {
        Value::Id(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_part_normalization() {
        assert_eq!(Value::from("  SKU-1 ").key_part(), Some("SKU-1".to_string()));
        assert_eq!(Value::Float(20.0).key_part(), Some("20".to_string()));
        assert_eq!(Value::Float(2.5).key_part(), Some("2.5".to_string()));
        assert_eq!(Value::Int(7).key_part(), Some("7".to_string()));
        assert_eq!(Value::Bool(true).key_part(), Some("true".to_string()));
        assert_eq!(Value::from("   ").key_part(), None);
        assert_eq!(Value::Null.key_part(), None);
    }

    #[test]
    fn test_key_part_keeps_case() {
        assert_ne!(Value::from("abc").key_part(), Value::from("ABC").key_part());
    }

    #[test]
    fn test_symbolic_ref_round_trip() {
        let token = SymbolicRef::new("ProductCategory", 12);
        assert_eq!(token.to_string(), "ProductCategory:12");
        assert_eq!(SymbolicRef::parse("ProductCategory:12"), Some(token));
        assert_eq!(SymbolicRef::parse("ProductCategory"), None);
        assert_eq!(SymbolicRef::parse(":3"), None);
        assert_eq!(SymbolicRef::parse("ProductCategory:x"), None);
    }

    #[test]
    fn test_as_int_conversions() {
        assert_eq!(Value::Int(10).as_int(), Some(10));
        assert_eq!(Value::Float(10.0).as_int(), Some(10));
        assert_eq!(Value::Float(10.5).as_int(), None);
        assert_eq!(Value::from(" 30 ").as_int(), Some(30));
        assert_eq!(Value::from("thirty").as_int(), None);
    }

    #[test]
    fn test_from_json() {
        assert_eq!(Value::from_json(&serde_json::json!(20)), Value::Int(20));
        assert_eq!(Value::from_json(&serde_json::json!(20.0)).key_part(), Some("20".to_string()));
        assert_eq!(Value::from_json(&serde_json::json!("a")), Value::from("a"));
        assert_eq!(Value::from_json(&serde_json::Value::Null), Value::Null);
    }
}
