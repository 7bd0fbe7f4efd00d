//! Resolved records ready for load planning

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::key::NaturalKey;
use super::staged::StagedRecord;
use super::value::{SymbolicRef, TargetId, Value};

/// A staged record whose reference fields hold target ids or symbolic tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedRecord {
    pub entity_type: String,
    /// Sequence of the staged record this was derived from
    pub sequence: usize,
    /// Natural key computed from the staged (unresolved) values.
    /// This is the key other staged records use to refer to this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_key: Option<NaturalKey>,
    pub fields: BTreeMap<String, Value>,
    /// Optional references that matched nothing and were nulled
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dropped_refs: Vec<DroppedReference>,
}

/// An optional reference whose value matched no record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedReference {
    pub field: String,
    /// Referenced entity type
    pub entity_type: String,
    /// Staged value (or scoped key) that matched nothing
    pub value: String,
}

impl std::fmt::Display for DroppedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dropped reference {} = '{}': no {} record with that key",
            self.field, self.value, self.entity_type
        )
    }
}

impl ResolvedRecord {
    /// Start a resolved record from a staged one (fields copied as-is)
    pub fn from_staged(record: &StagedRecord, reference_key: Option<NaturalKey>) -> Self {
        ResolvedRecord {
            entity_type: record.entity_type.clone(),
            sequence: record.sequence,
            reference_key,
            fields: record.fields.clone(),
            dropped_refs: Vec::new(),
        }
    }

    /// Symbolic token naming this record
    pub fn token(&self) -> SymbolicRef {
        SymbolicRef::new(&self.entity_type, self.sequence)
    }

    /// Get a non-null field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_empty())
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    pub fn remove_field(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Reference fields still holding symbolic tokens, in field order
    pub fn symbolic_refs(&self) -> impl Iterator<Item = (&str, &SymbolicRef)> {
        self.fields
            .iter()
            .filter_map(|(name, value)| value.as_symbolic().map(|t| (name.as_str(), t)))
    }

    /// Replace every token that has a known id; unknown tokens are left in place
    pub fn substitute_refs(&mut self, ids: &HashMap<SymbolicRef, TargetId>) -> usize {
        let mut replaced = 0;
        for value in self.fields.values_mut() {
            let Value::Ref(token) = &*value else {
                continue;
            };
            if let Some(id) = ids.get(token).cloned() {
                *value = Value::Id(id);
                replaced += 1;
            }
        }
        replaced
    }

    /// First field still holding a token, if any
    pub fn first_pending_ref(&self) -> Option<(String, SymbolicRef)> {
        self.symbolic_refs()
            .next()
            .map(|(field, token)| (field.to_string(), token.clone()))
    }

    /// Convert fields to a JSON object for store payloads
    pub fn to_json(&self, skip_nulls: bool) -> serde_json::Map<String, serde_json::Value> {
        let mut obj = serde_json::Map::new();
        for (key, value) in &self.fields {
            if skip_nulls && value.is_null() {
                continue;
            }
            obj.insert(key.clone(), value.to_json());
        }
        obj
    }

    /// Short human label, e.g. `Product2 #3 [SKU-1]`
    pub fn label(&self) -> String {
        match &self.reference_key {
            Some(key) => format!("{} #{} [{}]", self.entity_type, self.sequence, key),
            None => format!("{} #{}", self.entity_type, self.sequence),
        }
    }
}
