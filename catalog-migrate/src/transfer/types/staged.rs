//! Staged records as supplied by a staging source

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::value::{SymbolicRef, Value};

/// One staged row of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedRecord {
    pub entity_type: String,
    /// 1-based row-local sequence number, unique within the entity type
    pub sequence: usize,
    pub fields: BTreeMap<String, Value>,
}

impl StagedRecord {
    pub fn new(entity_type: impl Into<String>, sequence: usize) -> Self {
        StagedRecord {
            entity_type: entity_type.into(),
            sequence,
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn set_field(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Get a non-null field value
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field).filter(|v| !v.is_empty())
    }

    /// Symbolic token other records of the same batch use to point at this one
    pub fn token(&self) -> SymbolicRef {
        SymbolicRef::new(&self.entity_type, self.sequence)
    }
}

/// All staged records of a run, keyed by entity type
#[derive(Debug, Clone, Default)]
pub struct StagedData {
    records: HashMap<String, Vec<StagedRecord>>,
}

impl StagedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row for an entity type, assigning the next sequence number
    pub fn push(
        &mut self,
        entity_type: &str,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) -> &StagedRecord {
        let rows = self.records.entry(entity_type.to_string()).or_default();
        let mut record = StagedRecord::new(entity_type, rows.len() + 1);
        record.fields.extend(fields);
        rows.push(record);
        &rows[rows.len() - 1]
    }

    /// Append an already-built record (its sequence is kept)
    pub fn insert(&mut self, record: StagedRecord) {
        self.records
            .entry(record.entity_type.clone())
            .or_default()
            .push(record);
    }

    /// Records of one entity type (empty if none were staged)
    pub fn get(&self, entity_type: &str) -> &[StagedRecord] {
        self.records
            .get(entity_type)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn total_records(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records() == 0
    }
}
