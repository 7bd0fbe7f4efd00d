//! Reference resolution
//!
//! Turns the raw foreign-key values of a staged record into target ids
//! (records already known to exist) or symbolic tokens (records being
//! created in the same batch).

use std::collections::HashMap;

use crate::schema::{EntityTypeDescriptor, FieldDescriptor, ReferenceFallback};

use super::types::{
    DroppedReference, IdentityMap, NaturalKey, ResolvedRecord, StagedRecord, SymbolicRef, Value,
};

/// Why a record could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    /// No known or pending record matches the reference value
    UnresolvedReference {
        field: String,
        entity_type: String,
        value: String,
    },
    /// A grouped record's parent has no target id yet
    ParentNotLoaded { field: String, token: String },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionError::UnresolvedReference {
                field,
                entity_type,
                value,
            } => {
                write!(
                    f,
                    "Unresolved reference {} = '{}': no {} record with that key",
                    field, value, entity_type
                )
            }
            ResolutionError::ParentNotLoaded { field, token } => {
                write!(f, "Parent {} = {} has not been loaded", field, token)
            }
        }
    }
}

impl std::error::Error for ResolutionError {}

/// Records about to be created in the current batch, by entity type and
/// natural key
#[derive(Debug, Clone, Default)]
pub struct BatchRefs {
    tables: HashMap<String, HashMap<NaturalKey, SymbolicRef>>,
}

impl BatchRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batch refs for the staged records of one type that are not yet in
    /// the identity map
    pub fn pending<'r>(
        descriptor: &EntityTypeDescriptor,
        records: impl IntoIterator<Item = &'r StagedRecord>,
        identity: &IdentityMap,
    ) -> Self {
        let mut refs = Self::new();
        for record in records {
            let Some(key) = descriptor.staged_key(record) else {
                continue;
            };
            if identity.contains(&descriptor.name, &key) {
                continue;
            }
            refs.insert(&descriptor.name, key, record.token());
        }
        refs
    }

    /// Register a pending record. The first record staged for a key wins;
    /// later duplicates are rejected by the planner.
    pub fn insert(&mut self, entity_type: &str, key: NaturalKey, token: SymbolicRef) {
        self.tables
            .entry(entity_type.to_string())
            .or_default()
            .entry(key)
            .or_insert(token);
    }

    pub fn get(&self, entity_type: &str, key: &NaturalKey) -> Option<&SymbolicRef> {
        self.tables.get(entity_type)?.get(key)
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolve every reference field of a staged record.
///
/// Rules per reference field, in declaration order:
/// 1. empty value on an optional field stays null
/// 2. key known to the identity map becomes the target id
/// 3. key pending in the batch becomes a symbolic token
/// 4. otherwise the record fails if the field is required (or its fallback
///    is `error`), else the field is nulled and listed in `dropped_refs`
pub fn resolve(
    descriptor: &EntityTypeDescriptor,
    record: &StagedRecord,
    identity: &IdentityMap,
    batch: &BatchRefs,
) -> Result<ResolvedRecord, ResolutionError> {
    let mut resolved = ResolvedRecord::from_staged(record, descriptor.staged_key(record));

    for field in descriptor.foreign_keys() {
        let value = resolve_field(field, record, identity, batch, &mut resolved.dropped_refs)?;
        resolved.set_field(&field.name, value);
    }

    Ok(resolved)
}

fn resolve_field(
    field: &FieldDescriptor,
    record: &StagedRecord,
    identity: &IdentityMap,
    batch: &BatchRefs,
    dropped: &mut Vec<DroppedReference>,
) -> Result<Value, ResolutionError> {
    let Some(reference) = &field.reference else {
        return Ok(record.fields.get(&field.name).cloned().unwrap_or_default());
    };

    let raw = record.get(&field.name);

    // Already a target id (pre-resolved staging or prefetch)
    if let Some(Value::Id(id)) = raw {
        return Ok(Value::Id(id.clone()));
    }

    let key = raw.and_then(|_| field.reference_key(&record.fields));

    if let Some(key) = &key {
        if let Some(id) = identity.get(&reference.target, key) {
            return Ok(Value::Id(id.clone()));
        }
        if let Some(token) = batch.get(&reference.target, key) {
            return Ok(Value::Ref(token.clone()));
        }
    }

    if raw.is_none() && !field.required {
        return Ok(Value::Null);
    }

    let shown = match (&key, raw) {
        (Some(key), _) => key.to_string(),
        (None, Some(value)) => value.to_string(),
        (None, None) => String::new(),
    };

    match field.effective_fallback() {
        ReferenceFallback::Null => {
            log::warn!(
                "{} #{}: no {} matches {} = '{}', using null",
                record.entity_type,
                record.sequence,
                reference.target,
                field.name,
                shown
            );
            dropped.push(DroppedReference {
                field: field.name.clone(),
                entity_type: reference.target.clone(),
                value: shown,
            });
            Ok(Value::Null)
        }
        ReferenceFallback::Error => Err(ResolutionError::UnresolvedReference {
            field: field.name.clone(),
            entity_type: reference.target.clone(),
            value: shown,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityTypeDescriptor, FieldDescriptor};
    use crate::transfer::TargetId;

    fn category() -> EntityTypeDescriptor {
        EntityTypeDescriptor::new("Category")
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::reference("CatalogId", "Catalog").required())
            .with_field(FieldDescriptor::reference("ParentId", "Category"))
            .with_natural_key(["Code"])
    }

    fn staged(seq: usize, code: &str, catalog: &str, parent: Option<&str>) -> StagedRecord {
        let record = StagedRecord::new("Category", seq)
            .with_field("Code", code)
            .with_field("CatalogId", catalog);
        match parent {
            Some(parent) => record.with_field("ParentId", parent),
            None => record,
        }
    }

    fn identity_with_catalog() -> IdentityMap {
        let mut identity = IdentityMap::new();
        identity
            .insert("Catalog", NaturalKey::new(["MAIN"]), TargetId::new("cat-1"))
            .unwrap();
        identity
    }

    #[test]
    fn test_known_key_resolves_to_id() {
        let descriptor = category();
        let identity = identity_with_catalog();
        let record = staged(1, "ROOT", "MAIN", None);

        let resolved = resolve(&descriptor, &record, &identity, &BatchRefs::new()).unwrap();
        assert_eq!(resolved.get("CatalogId"), Some(&Value::Id(TargetId::new("cat-1"))));
        assert_eq!(resolved.fields.get("ParentId"), Some(&Value::Null));
        assert!(resolved.dropped_refs.is_empty());
        assert_eq!(resolved.reference_key, Some(NaturalKey::new(["ROOT"])));
    }

    #[test]
    fn test_pending_key_resolves_to_token() {
        let descriptor = category();
        let identity = identity_with_catalog();
        let records = vec![
            staged(1, "ROOT", "MAIN", None),
            staged(2, "CHILD", "MAIN", Some("ROOT")),
        ];
        let batch = BatchRefs::pending(&descriptor, &records, &identity);

        let child = resolve(&descriptor, &records[1], &identity, &batch).unwrap();
        assert_eq!(
            child.get("ParentId"),
            Some(&Value::Ref(SymbolicRef::new("Category", 1)))
        );
    }

    #[test]
    fn test_identity_wins_over_batch() {
        let descriptor = category();
        let mut identity = identity_with_catalog();
        identity
            .insert("Category", NaturalKey::new(["ROOT"]), TargetId::new("pc-9"))
            .unwrap();
        let records = vec![
            staged(1, "ROOT", "MAIN", None),
            staged(2, "CHILD", "MAIN", Some("ROOT")),
        ];
        let batch = BatchRefs::pending(&descriptor, &records, &identity);
        assert_eq!(batch.len(), 1);

        let child = resolve(&descriptor, &records[1], &identity, &batch).unwrap();
        assert_eq!(child.get("ParentId"), Some(&Value::Id(TargetId::new("pc-9"))));
    }

    #[test]
    fn test_required_unresolved_fails() {
        let descriptor = category();
        let record = staged(1, "ROOT", "MISSING", None);

        let err = resolve(&descriptor, &record, &identity_with_catalog(), &BatchRefs::new())
            .unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnresolvedReference {
                field: "CatalogId".into(),
                entity_type: "Catalog".into(),
                value: "MISSING".into(),
            }
        );
    }

    #[test]
    fn test_required_empty_fails() {
        let descriptor = category();
        let record = StagedRecord::new("Category", 1).with_field("Code", "ROOT");

        assert!(matches!(
            resolve(&descriptor, &record, &identity_with_catalog(), &BatchRefs::new()),
            Err(ResolutionError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_optional_unresolved_falls_back() {
        let descriptor = category();
        let record = staged(1, "ORPHAN", "MAIN", Some("NOWHERE"));

        let resolved =
            resolve(&descriptor, &record, &identity_with_catalog(), &BatchRefs::new()).unwrap();
        assert_eq!(resolved.fields.get("ParentId"), Some(&Value::Null));
        assert_eq!(
            resolved.dropped_refs,
            vec![DroppedReference {
                field: "ParentId".into(),
                entity_type: "Category".into(),
                value: "NOWHERE".into(),
            }]
        );

        let strict = EntityTypeDescriptor::new("Category")
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::reference("CatalogId", "Catalog").required())
            .with_field(
                FieldDescriptor::reference("ParentId", "Category")
                    .with_fallback(ReferenceFallback::Error),
            )
            .with_natural_key(["Code"]);
        assert!(resolve(&strict, &record, &identity_with_catalog(), &BatchRefs::new()).is_err());
    }

    #[test]
    fn test_scoped_reference_uses_scope_value() {
        let component = EntityTypeDescriptor::new("Component")
            .with_field(FieldDescriptor::reference("ParentId", "Product").required())
            .with_field(FieldDescriptor::reference("ChildId", "Product").required())
            .with_field(
                FieldDescriptor::reference("GroupId", "Group")
                    .scoped_by("ParentId")
                    .required(),
            )
            .with_natural_key(["ParentId", "ChildId"]);

        let mut identity = IdentityMap::new();
        for (sku, id) in [("BUNDLE", "p-1"), ("PART", "p-2")] {
            identity
                .insert("Product", NaturalKey::new([sku]), TargetId::new(id))
                .unwrap();
        }
        identity
            .insert("Group", NaturalKey::new(["BUNDLE", "20"]), TargetId::new("g-20"))
            .unwrap();

        let record = StagedRecord::new("Component", 1)
            .with_field("ParentId", "BUNDLE")
            .with_field("ChildId", "PART")
            .with_field("GroupId", Value::Float(20.0));

        let resolved = resolve(&component, &record, &identity, &BatchRefs::new()).unwrap();
        assert_eq!(resolved.get("GroupId"), Some(&Value::Id(TargetId::new("g-20"))));
        assert_eq!(resolved.get("ParentId"), Some(&Value::Id(TargetId::new("p-1"))));
        assert_eq!(resolved.reference_key, Some(NaturalKey::new(["BUNDLE", "PART"])));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let descriptor = category();
        let identity = identity_with_catalog();
        let records = vec![
            staged(1, "ROOT", "MAIN", None),
            staged(2, "CHILD", "MAIN", Some("ROOT")),
            staged(3, "LEAF", "MAIN", Some("CHILD")),
        ];
        let batch = BatchRefs::pending(&descriptor, &records, &identity);

        let first: Vec<_> = records
            .iter()
            .map(|r| resolve(&descriptor, r, &identity, &batch))
            .collect();
        let second: Vec<_> = records
            .iter()
            .map(|r| resolve(&descriptor, r, &identity, &batch))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_keys_first_token_wins() {
        let descriptor = category();
        let records = vec![
            staged(1, "ROOT", "MAIN", None),
            staged(2, "ROOT", "MAIN", None),
        ];
        let batch = BatchRefs::pending(&descriptor, &records, &IdentityMap::new());
        assert_eq!(
            batch.get("Category", &NaturalKey::new(["ROOT"])),
            Some(&SymbolicRef::new("Category", 1))
        );
    }
}
