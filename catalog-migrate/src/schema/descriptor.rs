//! Entity type descriptors
//!
//! A descriptor is the static description of one entity type: its fields,
//! which of them are references to other types, the natural key used to
//! detect existing records, and whether the type is grouped under a parent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::transfer::{NaturalKey, ResolvedRecord, StagedRecord, Value};

/// Storage kind of a field, used when a natural key is rendered into a
/// store query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    Boolean,
}

/// Fallback behavior for an optional reference that cannot be resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceFallback {
    /// Use null for the reference field and keep the record
    #[default]
    Null,
    /// Exclude the record, same as a required reference
    Error,
}

/// Foreign-key metadata for a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Referenced entity type
    pub target: String,
    /// Sibling field whose value prefixes the lookup key.
    ///
    /// A component naming "group 20" of its parent product declares
    /// `scope_field = "ParentProductId"`, so the lookup key becomes
    /// `(parent, 20)`, matching a group keyed by `[ParentProductId, Sequence]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_field: Option<String>,
    /// Behavior when an optional reference has no match
    #[serde(default)]
    pub fallback: ReferenceFallback,
}

impl Reference {
    /// Number of natural-key parts the lookup key carries
    pub fn key_arity(&self) -> usize {
        if self.scope_field.is_some() { 2 } else { 1 }
    }
}

/// A single field of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    /// Never resent once the record exists
    #[serde(default)]
    pub create_only: bool,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,
}

impl FieldDescriptor {
    /// Plain text field
    pub fn new(name: impl Into<String>) -> Self {
        FieldDescriptor {
            name: name.into(),
            required: false,
            create_only: false,
            kind: FieldKind::Text,
            reference: None,
        }
    }

    /// Reference (foreign key) into another entity type
    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        FieldDescriptor {
            reference: Some(Reference {
                target: target.into(),
                scope_field: None,
                fallback: ReferenceFallback::default(),
            }),
            ..Self::new(name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn create_only(mut self) -> Self {
        self.create_only = true;
        self
    }

    pub fn number(mut self) -> Self {
        self.kind = FieldKind::Number;
        self
    }

    pub fn boolean(mut self) -> Self {
        self.kind = FieldKind::Boolean;
        self
    }

    /// Scope a reference by a sibling field (no-op on non-reference fields)
    pub fn scoped_by(mut self, scope_field: impl Into<String>) -> Self {
        if let Some(reference) = self.reference.as_mut() {
            reference.scope_field = Some(scope_field.into());
        }
        self
    }

    /// Set the fallback for an optional reference
    pub fn with_fallback(mut self, fallback: ReferenceFallback) -> Self {
        if let Some(reference) = self.reference.as_mut() {
            reference.fallback = fallback;
        }
        self
    }

    pub fn is_reference(&self) -> bool {
        self.reference.is_some()
    }

    /// Fallback that applies when this reference cannot be resolved.
    /// Required references always fail the record.
    pub fn effective_fallback(&self) -> ReferenceFallback {
        match &self.reference {
            Some(_) if self.required => ReferenceFallback::Error,
            Some(reference) => reference.fallback,
            None => ReferenceFallback::Error,
        }
    }

    /// Lookup key for this reference field, computed from raw record fields
    pub fn reference_key(&self, fields: &BTreeMap<String, Value>) -> Option<NaturalKey> {
        let reference = self.reference.as_ref()?;
        let value = fields.get(&self.name).and_then(Value::key_part);
        match &reference.scope_field {
            Some(scope) => {
                NaturalKey::collect([fields.get(scope).and_then(Value::key_part), value])
            }
            None => NaturalKey::collect([value]),
        }
    }
}

/// Parent/sequence metadata for types grouped under a parent record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    /// Reference field naming the parent record
    pub parent_field: String,
    /// Integer field ordering siblings under one parent
    pub sequence_field: String,
}

/// Static description of an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeDescriptor {
    pub name: String,
    pub natural_key: Vec<String>,
    #[serde(rename = "field", default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grouping: Option<Grouping>,
}

impl EntityTypeDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        EntityTypeDescriptor {
            name: name.into(),
            natural_key: Vec::new(),
            fields: Vec::new(),
            grouping: None,
        }
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_natural_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.natural_key = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Mark this type as grouped under the record named by `parent_field`
    pub fn grouped(
        mut self,
        parent_field: impl Into<String>,
        sequence_field: impl Into<String>,
    ) -> Self {
        self.grouping = Some(Grouping {
            parent_field: parent_field.into(),
            sequence_field: sequence_field.into(),
        });
        self
    }

    /// Get a field by name
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Reference fields in declaration order
    pub fn foreign_keys(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.is_reference())
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields.iter().filter(|f| f.required)
    }

    pub fn is_grouped(&self) -> bool {
        self.grouping.is_some()
    }

    /// True if any reference points back at this same type
    pub fn is_self_referential(&self) -> bool {
        self.foreign_keys()
            .any(|f| f.reference.as_ref().is_some_and(|r| r.target == self.name))
    }

    /// True if a natural key part is itself a reference field
    pub fn natural_key_has_references(&self) -> bool {
        self.natural_key
            .iter()
            .any(|name| self.field(name).is_some_and(FieldDescriptor::is_reference))
    }

    /// Fields that must never be sent on update: natural key and create-only fields
    pub fn is_update_excluded(&self, field: &str) -> bool {
        self.natural_key.iter().any(|k| k == field)
            || self.field(field).is_some_and(|f| f.create_only)
    }

    /// Natural key from the raw staged values (the key other staged rows refer to)
    pub fn staged_key(&self, record: &StagedRecord) -> Option<NaturalKey> {
        self.key_from_fields(&record.fields)
    }

    /// Natural key from resolved values (the key as held by the target store)
    pub fn resolved_key(&self, record: &ResolvedRecord) -> Option<NaturalKey> {
        self.key_from_fields(&record.fields)
    }

    /// True while a natural key part still holds an in-batch token instead
    /// of a value the store can match on
    pub fn key_holds_token(&self, record: &ResolvedRecord) -> bool {
        self.natural_key
            .iter()
            .any(|name| matches!(record.fields.get(name), Some(Value::Ref(_))))
    }

    /// Natural key fields that have no usable value
    pub fn missing_key_fields(&self, fields: &BTreeMap<String, Value>) -> Vec<String> {
        self.natural_key
            .iter()
            .filter(|name| fields.get(*name).and_then(Value::key_part).is_none())
            .cloned()
            .collect()
    }

    /// Natural key from any field map
    pub fn key_from_fields(&self, fields: &BTreeMap<String, Value>) -> Option<NaturalKey> {
        NaturalKey::collect(
            self.natural_key
                .iter()
                .map(|name| fields.get(name).and_then(Value::key_part)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::{SymbolicRef, TargetId};

    fn group_descriptor() -> EntityTypeDescriptor {
        EntityTypeDescriptor::new("ProductComponentGroup")
            .with_field(FieldDescriptor::reference("ParentProductId", "Product2").required())
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::new("Sequence").number().required())
            .with_field(FieldDescriptor::new("Code").create_only())
            .with_natural_key(["ParentProductId", "Sequence"])
            .grouped("ParentProductId", "Sequence")
    }

    #[test]
    fn test_key_holds_token_until_parent_id_is_known() {
        let descriptor = group_descriptor();
        let staged = StagedRecord::new("ProductComponentGroup", 1)
            .with_field("ParentProductId", Value::from("BUNDLE-1"))
            .with_field("Sequence", Value::Int(10))
            .with_field("Name", Value::from("Storage"));

        let mut record = ResolvedRecord::from_staged(&staged, descriptor.staged_key(&staged));
        record.set_field("ParentProductId", Value::Ref(SymbolicRef::new("Product2", 3)));
        assert!(descriptor.key_holds_token(&record));

        record.set_field("Name", Value::Ref(SymbolicRef::new("Product2", 4)));
        record.set_field("ParentProductId", Value::Id(TargetId::new("01t000000000001")));
        assert!(!descriptor.key_holds_token(&record));
    }

    #[test]
    fn test_update_excluded_fields() {
        let descriptor = group_descriptor();
        assert!(descriptor.is_update_excluded("ParentProductId"));
        assert!(descriptor.is_update_excluded("Sequence"));
        assert!(descriptor.is_update_excluded("Code"));
        assert!(!descriptor.is_update_excluded("Name"));
    }

    #[test]
    fn test_staged_key_requires_every_part() {
        let descriptor = group_descriptor();
        let record = StagedRecord::new("ProductComponentGroup", 1)
            .with_field("ParentProductId", Value::from("BUNDLE-1"))
            .with_field("Sequence", Value::Float(20.0));
        assert_eq!(
            descriptor.staged_key(&record),
            Some(NaturalKey::new(["BUNDLE-1", "20"]))
        );

        let partial = StagedRecord::new("ProductComponentGroup", 2)
            .with_field("ParentProductId", Value::from("BUNDLE-1"));
        assert_eq!(descriptor.staged_key(&partial), None);
        assert_eq!(descriptor.missing_key_fields(&partial.fields), vec!["Sequence".to_string()]);
    }

    #[test]
    fn test_scoped_reference_key() {
        let field = FieldDescriptor::reference("ProductComponentGroupId", "ProductComponentGroup")
            .scoped_by("ParentProductId");
        let record = StagedRecord::new("ProductRelatedComponent", 1)
            .with_field("ParentProductId", Value::from("BUNDLE-1"))
            .with_field("ProductComponentGroupId", Value::Int(20));

        assert_eq!(
            field.reference_key(&record.fields),
            Some(NaturalKey::new(["BUNDLE-1", "20"]))
        );
    }

    #[test]
    fn test_effective_fallback() {
        let optional = FieldDescriptor::reference("ParentCategoryId", "ProductCategory");
        assert_eq!(optional.effective_fallback(), ReferenceFallback::Null);

        let strict = FieldDescriptor::reference("ParentCategoryId", "ProductCategory")
            .with_fallback(ReferenceFallback::Error);
        assert_eq!(strict.effective_fallback(), ReferenceFallback::Error);

        let required = FieldDescriptor::reference("CatalogId", "ProductCatalog").required();
        assert_eq!(required.effective_fallback(), ReferenceFallback::Error);
    }

    #[test]
    fn test_self_referential_detection() {
        let category = EntityTypeDescriptor::new("ProductCategory")
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::reference("ParentCategoryId", "ProductCategory"))
            .with_natural_key(["Code"]);
        assert!(category.is_self_referential());
        assert!(!group_descriptor().is_self_referential());
        assert!(group_descriptor().natural_key_has_references());
    }
}
