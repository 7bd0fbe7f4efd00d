//! Entity schema registry
//!
//! Holds every registered [`EntityTypeDescriptor`] in registration order and
//! rejects descriptors that fail configuration-integrity checks.

use std::collections::{HashMap, HashSet};

use super::descriptor::EntityTypeDescriptor;

/// Configuration-integrity error raised while registering or describing types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Asked to describe a type that was never registered
    UnknownEntityType { entity_type: String },
    /// Same type registered twice
    DuplicateEntityType { entity_type: String },
    /// Same field declared twice on one type
    DuplicateField { entity_type: String, field: String },
    /// Type declares no natural key
    EmptyNaturalKey { entity_type: String },
    /// Natural key names a field that is not in the field list
    NaturalKeyNotInFields { entity_type: String, field: String },
    /// Grouping metadata does not line up with the field list
    InvalidGrouping { entity_type: String, reason: String },
    /// Reference scope names a field that is not in the field list
    InvalidReferenceScope { entity_type: String, field: String, scope_field: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::UnknownEntityType { entity_type } => {
                write!(f, "Unknown entity type '{}'", entity_type)
            }
            SchemaError::DuplicateEntityType { entity_type } => {
                write!(f, "Entity type '{}' is registered more than once", entity_type)
            }
            SchemaError::DuplicateField { entity_type, field } => {
                write!(f, "Field '{}' is declared more than once on '{}'", field, entity_type)
            }
            SchemaError::EmptyNaturalKey { entity_type } => {
                write!(f, "Entity type '{}' declares no natural key", entity_type)
            }
            SchemaError::NaturalKeyNotInFields { entity_type, field } => {
                write!(
                    f,
                    "Natural key field '{}' of '{}' is not in its field list",
                    field, entity_type
                )
            }
            SchemaError::InvalidGrouping { entity_type, reason } => {
                write!(f, "Invalid grouping on '{}': {}", entity_type, reason)
            }
            SchemaError::InvalidReferenceScope {
                entity_type,
                field,
                scope_field,
            } => {
                write!(
                    f,
                    "Reference '{}.{}' is scoped by undeclared field '{}'",
                    entity_type, field, scope_field
                )
            }
        }
    }
}

impl std::error::Error for SchemaError {}

/// Registry of entity type descriptors, ordered by registration
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    descriptors: Vec<EntityTypeDescriptor>,
    index: HashMap<String, usize>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, registering them in order
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = EntityTypeDescriptor>,
    ) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    /// Register a descriptor after checking its integrity
    pub fn register(&mut self, descriptor: EntityTypeDescriptor) -> Result<(), SchemaError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(SchemaError::DuplicateEntityType {
                entity_type: descriptor.name.clone(),
            });
        }

        validate_descriptor(&descriptor)?;

        log::debug!(
            "Registered entity type '{}' ({} fields, key: {})",
            descriptor.name,
            descriptor.fields.len(),
            descriptor.natural_key.join(", ")
        );

        self.index.insert(descriptor.name.clone(), self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Describe a registered type
    pub fn describe(&self, entity_type: &str) -> Result<&EntityTypeDescriptor, SchemaError> {
        self.index
            .get(entity_type)
            .map(|&idx| &self.descriptors[idx])
            .ok_or_else(|| SchemaError::UnknownEntityType {
                entity_type: entity_type.to_string(),
            })
    }

    /// All descriptors in registration order
    pub fn all_types(&self) -> &[EntityTypeDescriptor] {
        &self.descriptors
    }

    pub fn contains(&self, entity_type: &str) -> bool {
        self.index.contains_key(entity_type)
    }

    /// Registration position of a type (used for deterministic tie-breaks)
    pub fn position(&self, entity_type: &str) -> Option<usize> {
        self.index.get(entity_type).copied()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

fn validate_descriptor(descriptor: &EntityTypeDescriptor) -> Result<(), SchemaError> {
    let entity_type = &descriptor.name;

    let mut seen = HashSet::new();
    for field in &descriptor.fields {
        if !seen.insert(field.name.as_str()) {
            return Err(SchemaError::DuplicateField {
                entity_type: entity_type.clone(),
                field: field.name.clone(),
            });
        }
    }

    if descriptor.natural_key.is_empty() {
        return Err(SchemaError::EmptyNaturalKey {
            entity_type: entity_type.clone(),
        });
    }

    for key_field in &descriptor.natural_key {
        if !descriptor.has_field(key_field) {
            return Err(SchemaError::NaturalKeyNotInFields {
                entity_type: entity_type.clone(),
                field: key_field.clone(),
            });
        }
    }

    for field in descriptor.foreign_keys() {
        let Some(scope_field) = field.reference.as_ref().and_then(|r| r.scope_field.as_ref())
        else {
            continue;
        };
        if scope_field == &field.name || !descriptor.has_field(scope_field) {
            return Err(SchemaError::InvalidReferenceScope {
                entity_type: entity_type.clone(),
                field: field.name.clone(),
                scope_field: scope_field.clone(),
            });
        }
    }

    if let Some(grouping) = &descriptor.grouping {
        let invalid = |reason: String| SchemaError::InvalidGrouping {
            entity_type: entity_type.clone(),
            reason,
        };

        match descriptor.field(&grouping.parent_field) {
            None => {
                return Err(invalid(format!(
                    "parent field '{}' is not declared",
                    grouping.parent_field
                )));
            }
            Some(field) if !field.is_reference() => {
                return Err(invalid(format!(
                    "parent field '{}' is not a reference",
                    grouping.parent_field
                )));
            }
            Some(_) => {}
        }

        if !descriptor.has_field(&grouping.sequence_field) {
            return Err(invalid(format!(
                "sequence field '{}' is not declared",
                grouping.sequence_field
            )));
        }
    }

    Ok(())
}
