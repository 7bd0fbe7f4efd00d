//! Identity map: (entity type, natural key) -> target id

use std::collections::HashMap;

use super::key::NaturalKey;
use super::value::TargetId;

/// Attempt to bind a natural key that already maps to a different id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConflict {
    pub entity_type: String,
    pub key: NaturalKey,
    pub existing: TargetId,
    pub attempted: TargetId,
}

impl std::fmt::Display for IdentityConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] is already bound to {}, refusing {}",
            self.entity_type, self.key, self.existing, self.attempted
        )
    }
}

impl std::error::Error for IdentityConflict {}

/// Ids of every record known to exist in the target store during one run.
///
/// Holds at most one id per (type, natural key).
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: HashMap<String, HashMap<NaturalKey, TargetId>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the id bound to a natural key
    pub fn get(&self, entity_type: &str, key: &NaturalKey) -> Option<&TargetId> {
        self.entries.get(entity_type)?.get(key)
    }

    pub fn contains(&self, entity_type: &str, key: &NaturalKey) -> bool {
        self.get(entity_type, key).is_some()
    }

    /// Bind a key to an id. Re-binding the same id is a no-op.
    pub fn insert(
        &mut self,
        entity_type: &str,
        key: NaturalKey,
        id: TargetId,
    ) -> Result<(), IdentityConflict> {
        let table = self.entries.entry(entity_type.to_string()).or_default();
        match table.get(&key) {
            Some(existing) if existing != &id => Err(IdentityConflict {
                entity_type: entity_type.to_string(),
                key,
                existing: existing.clone(),
                attempted: id,
            }),
            Some(_) => Ok(()),
            None => {
                table.insert(key, id);
                Ok(())
            }
        }
    }

    /// Number of keys known for one type
    pub fn count(&self, entity_type: &str) -> usize {
        self.entries.get(entity_type).map(HashMap::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut map = IdentityMap::new();
        let key = NaturalKey::new(["SKU-1"]);
        map.insert("Product2", key.clone(), TargetId::new("01t001")).unwrap();

        assert_eq!(map.get("Product2", &key), Some(&TargetId::new("01t001")));
        assert!(map.get("Pricebook2", &key).is_none());
        assert_eq!(map.count("Product2"), 1);
    }

    #[test]
    fn test_rebinding_same_id_is_noop() {
        let mut map = IdentityMap::new();
        let key = NaturalKey::new(["SKU-1"]);
        map.insert("Product2", key.clone(), TargetId::new("01t001")).unwrap();
        map.insert("Product2", key, TargetId::new("01t001")).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_conflicting_id_is_refused() {
        let mut map = IdentityMap::new();
        let key = NaturalKey::new(["SKU-1"]);
        map.insert("Product2", key.clone(), TargetId::new("01t001")).unwrap();

        let err = map
            .insert("Product2", key.clone(), TargetId::new("01t002"))
            .unwrap_err();
        assert_eq!(err.existing, TargetId::new("01t001"));
        assert_eq!(map.get("Product2", &key), Some(&TargetId::new("01t001")));
    }
}
