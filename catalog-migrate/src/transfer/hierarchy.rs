//! Bundle hierarchy checks
//!
//! Grouped entity types (bundle groups, bundle components) hang under a
//! parent record and are ordered by a per-parent sequence number. Sequence
//! problems are found before anything is loaded and only take out the
//! affected parent's hierarchy.

use std::collections::{HashMap, HashSet};

use crate::schema::{EntityTypeDescriptor, SchemaRegistry};

use super::resolver::ResolutionError;
use super::types::{NaturalKey, ResolvedRecord, StagedData, StagedRecord, Value};

/// What is wrong with a sequence value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    Missing,
    NotInteger,
    Duplicate,
    OutOfOrder,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConflictKind::Missing => "missing",
            ConflictKind::NotInteger => "not an integer",
            ConflictKind::Duplicate => "duplicated",
            ConflictKind::OutOfOrder => "out of order",
        };
        write!(f, "{}", text)
    }
}

/// Bad sequence numbering under one parent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConflict {
    pub entity_type: String,
    /// Entity type of the parent record
    pub parent_type: String,
    /// Staged key of the parent record
    pub parent_key: NaturalKey,
    /// Row that exposed the conflict
    pub sequence: usize,
    /// Offending sequence value as staged
    pub value: String,
    pub kind: ConflictKind,
}

impl std::fmt::Display for SequenceConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Sequence conflict in {} under {} [{}]: row {} value '{}' is {}",
            self.entity_type,
            self.parent_type,
            self.parent_key,
            self.sequence,
            self.value,
            self.kind
        )
    }
}

impl std::error::Error for SequenceConflict {}

/// Check sequence numbering of one grouped type.
///
/// Per parent, sequences must be integers, unique and strictly increasing
/// in staged order. Records without a parent value are left to the
/// resolver.
pub fn validate_sequences(
    descriptor: &EntityTypeDescriptor,
    records: &[StagedRecord],
) -> Vec<SequenceConflict> {
    let Some(grouping) = &descriptor.grouping else {
        return Vec::new();
    };
    let Some(parent_field) = descriptor.field(&grouping.parent_field) else {
        return Vec::new();
    };
    let Some(parent_type) = parent_field.reference.as_ref().map(|r| r.target.clone()) else {
        return Vec::new();
    };

    let mut conflicts = Vec::new();
    let mut last_seen: HashMap<NaturalKey, i64> = HashMap::new();
    let mut used: HashSet<(NaturalKey, i64)> = HashSet::new();

    for record in records {
        let Some(parent_key) = parent_field.reference_key(&record.fields) else {
            continue;
        };

        let raw = record.get(&grouping.sequence_field);
        let conflict = |kind: ConflictKind| SequenceConflict {
            entity_type: descriptor.name.clone(),
            parent_type: parent_type.clone(),
            parent_key: parent_key.clone(),
            sequence: record.sequence,
            value: raw.map(Value::to_string).unwrap_or_default(),
            kind,
        };

        let Some(raw_value) = raw else {
            conflicts.push(conflict(ConflictKind::Missing));
            continue;
        };
        let Some(seq) = raw_value.as_int() else {
            conflicts.push(conflict(ConflictKind::NotInteger));
            continue;
        };

        if !used.insert((parent_key.clone(), seq)) {
            conflicts.push(conflict(ConflictKind::Duplicate));
            continue;
        }
        if last_seen.get(&parent_key).is_some_and(|&previous| seq <= previous) {
            conflicts.push(conflict(ConflictKind::OutOfOrder));
            continue;
        }
        last_seen.insert(parent_key, seq);
    }

    conflicts
}

/// Pre-flight hierarchy validation for a whole run
#[derive(Debug, Clone, Default)]
pub struct HierarchyCheck {
    conflicts: Vec<SequenceConflict>,
    /// (parent type, parent key) -> index of the first conflict
    poisoned: HashMap<(String, NaturalKey), usize>,
}

impl HierarchyCheck {
    /// Validate every grouped type of the registry against the staged data
    pub fn run(registry: &SchemaRegistry, staged: &StagedData) -> Self {
        let mut check = Self::default();

        for descriptor in registry.all_types().iter().filter(|d| d.is_grouped()) {
            for conflict in validate_sequences(descriptor, staged.get(&descriptor.name)) {
                log::warn!("{}", conflict);
                let parent = (conflict.parent_type.clone(), conflict.parent_key.clone());
                check.poisoned.entry(parent).or_insert(check.conflicts.len());
                check.conflicts.push(conflict);
            }
        }

        if !check.conflicts.is_empty() {
            log::warn!(
                "{} sequence conflict(s) across {} parent record(s); those hierarchies will not load",
                check.conflicts.len(),
                check.poisoned.len()
            );
        }

        check
    }

    pub fn conflicts(&self) -> &[SequenceConflict] {
        &self.conflicts
    }

    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// The conflict that excludes this record, if its parent's hierarchy is poisoned
    pub fn conflict_for(
        &self,
        descriptor: &EntityTypeDescriptor,
        record: &StagedRecord,
    ) -> Option<&SequenceConflict> {
        let grouping = descriptor.grouping.as_ref()?;
        let parent_field = descriptor.field(&grouping.parent_field)?;
        let parent_type = &parent_field.reference.as_ref()?.target;
        let parent_key = parent_field.reference_key(&record.fields)?;

        self.poisoned
            .get(&(parent_type.clone(), parent_key))
            .map(|&idx| &self.conflicts[idx])
    }
}

/// A grouped record may only be submitted once its parent exists
pub fn require_loaded_parent(
    descriptor: &EntityTypeDescriptor,
    record: &ResolvedRecord,
) -> Result<(), ResolutionError> {
    let Some(grouping) = &descriptor.grouping else {
        return Ok(());
    };

    match record.fields.get(&grouping.parent_field) {
        Some(Value::Id(_)) => Ok(()),
        other => Err(ResolutionError::ParentNotLoaded {
            field: grouping.parent_field.clone(),
            token: other.map(Value::to_string).unwrap_or_else(|| "(null)".to_string()),
        }),
    }
}

/// Order grouped records by parent (first appearance) then sequence
pub fn order_siblings(descriptor: &EntityTypeDescriptor, records: &mut [ResolvedRecord]) {
    let Some(grouping) = &descriptor.grouping else {
        return;
    };

    let mut parent_rank: HashMap<String, usize> = HashMap::new();
    for record in records.iter() {
        let parent = parent_text(record, &grouping.parent_field);
        let next = parent_rank.len();
        parent_rank.entry(parent).or_insert(next);
    }

    records.sort_by_key(|record| {
        let rank = parent_rank
            .get(&parent_text(record, &grouping.parent_field))
            .copied()
            .unwrap_or(usize::MAX);
        let seq = record
            .get(&grouping.sequence_field)
            .and_then(Value::as_int)
            .unwrap_or(i64::MAX);
        (rank, seq)
    });
}

fn parent_text(record: &ResolvedRecord, field: &str) -> String {
    record
        .fields
        .get(field)
        .map(Value::to_string)
        .unwrap_or_default()
}
