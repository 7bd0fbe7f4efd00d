//! In-process target store
//!
//! Backs `--dry-run` and the test suite. Behaves like a strict remote store:
//! required fields are enforced, natural keys are unique, immutable fields
//! refuse updates, and symbolic tokens are only accepted when an earlier
//! record of the same call created them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

use super::client::{RecordResult, TargetStoreClient};
use crate::schema::EntityTypeDescriptor;
use crate::transfer::{NaturalKey, ResolvedRecord, SymbolicRef, TargetId, Value};

/// A record held by the store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: TargetId,
    pub fields: BTreeMap<String, Value>,
}

/// One client call, as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Query { entity_type: String, keys: usize },
    /// Staged sequences of the submitted records, in submission order
    Create { entity_type: String, sequences: Vec<usize> },
    Update { entity_type: String, ids: Vec<TargetId> },
}

impl StoreCall {
    pub fn entity_type(&self) -> &str {
        match self {
            StoreCall::Query { entity_type, .. }
            | StoreCall::Create { entity_type, .. }
            | StoreCall::Update { entity_type, .. } => entity_type,
        }
    }
}

/// Per-record rejection rule: records whose `field` equals `value` fail
#[derive(Debug, Clone)]
struct RejectRule {
    entity_type: String,
    field: String,
    value: Value,
    message: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, Vec<StoredRecord>>,
    journal: Vec<StoreCall>,
    /// Entity type -> message of the error every call returns
    failing: HashMap<String, String>,
    rejections: Vec<RejectRule>,
}

impl MemoryState {
    fn check_failing(&self, entity_type: &str) -> anyhow::Result<()> {
        match self.failing.get(entity_type) {
            Some(message) => anyhow::bail!("{}: {}", entity_type, message),
            None => Ok(()),
        }
    }

    fn rejection(&self, entity_type: &str, fields: &BTreeMap<String, Value>) -> Option<RecordResult> {
        self.rejections
            .iter()
            .filter(|rule| rule.entity_type == entity_type)
            .find(|rule| fields.get(&rule.field) == Some(&rule.value))
            .map(|rule| RecordResult::failure(Some(rule.field.as_str()), rule.message.clone()))
    }

    fn find_by_key(&self, descriptor: &EntityTypeDescriptor, key: &NaturalKey) -> Option<&StoredRecord> {
        self.tables
            .get(&descriptor.name)?
            .iter()
            .find(|r| descriptor.key_from_fields(&r.fields).as_ref() == Some(key))
    }
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a panicking test; the data is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call for an entity type fail with `message`
    pub fn fail_entity(&self, entity_type: &str, message: &str) {
        self.lock()
            .failing
            .insert(entity_type.to_string(), message.to_string());
    }

    /// Refuse (per record) any record of `entity_type` whose `field` equals `value`
    pub fn reject_records(
        &self,
        entity_type: &str,
        field: &str,
        value: impl Into<Value>,
        message: &str,
    ) {
        self.lock().rejections.push(RejectRule {
            entity_type: entity_type.to_string(),
            field: field.to_string(),
            value: value.into(),
            message: message.to_string(),
        });
    }

    /// Insert a record directly, bypassing validation
    pub fn seed(&self, entity_type: &str, fields: BTreeMap<String, Value>) -> TargetId {
        let id = new_id(entity_type);
        self.lock()
            .tables
            .entry(entity_type.to_string())
            .or_default()
            .push(StoredRecord {
                id: id.clone(),
                fields,
            });
        id
    }

    /// Snapshot of every record of a type, in creation order
    pub fn records(&self, entity_type: &str) -> Vec<StoredRecord> {
        self.lock()
            .tables
            .get(entity_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn get(&self, entity_type: &str, id: &TargetId) -> Option<StoredRecord> {
        self.lock()
            .tables
            .get(entity_type)?
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    pub fn count(&self, entity_type: &str) -> usize {
        self.lock().tables.get(entity_type).map(Vec::len).unwrap_or(0)
    }

    /// Every call made so far
    pub fn journal(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }
}

#[async_trait]
impl TargetStoreClient for MemoryStore {
    async fn query(
        &self,
        descriptor: &EntityTypeDescriptor,
        keys: &[NaturalKey],
    ) -> anyhow::Result<HashMap<NaturalKey, TargetId>> {
        let mut state = self.lock();
        state.journal.push(StoreCall::Query {
            entity_type: descriptor.name.clone(),
            keys: keys.len(),
        });
        state.check_failing(&descriptor.name)?;

        let mut found = HashMap::new();
        for key in keys {
            if let Some(record) = state.find_by_key(descriptor, key) {
                found.insert(key.clone(), record.id.clone());
            }
        }
        Ok(found)
    }

    async fn bulk_create(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[ResolvedRecord],
    ) -> anyhow::Result<Vec<RecordResult>> {
        let mut state = self.lock();
        state.journal.push(StoreCall::Create {
            entity_type: descriptor.name.clone(),
            sequences: records.iter().map(|r| r.sequence).collect(),
        });
        state.check_failing(&descriptor.name)?;

        let mut assigned: HashMap<SymbolicRef, TargetId> = HashMap::new();
        let mut results = Vec::with_capacity(records.len());

        for record in records {
            let mut record = record.clone();
            record.substitute_refs(&assigned);

            if let Some((field, token)) = record.first_pending_ref() {
                results.push(RecordResult::failure(
                    Some(field.as_str()),
                    format!("Unknown reference token {}", token),
                ));
                continue;
            }
            if let Some(field) = descriptor.required_fields().find(|f| record.get(&f.name).is_none()) {
                results.push(RecordResult::failure(
                    Some(field.name.as_str()),
                    "Required field missing",
                ));
                continue;
            }
            if let Some(rejected) = state.rejection(&descriptor.name, &record.fields) {
                results.push(rejected);
                continue;
            }
            let duplicate = descriptor
                .key_from_fields(&record.fields)
                .and_then(|key| state.find_by_key(descriptor, &key))
                .map(|existing| existing.id.clone());
            if let Some(existing) = duplicate {
                results.push(RecordResult::failure(
                    None,
                    format!("Duplicate value found: duplicates value on record with id {}", existing),
                ));
                continue;
            }

            let id = new_id(&descriptor.name);
            state
                .tables
                .entry(descriptor.name.clone())
                .or_default()
                .push(StoredRecord {
                    id: id.clone(),
                    fields: record
                        .fields
                        .into_iter()
                        .filter(|(_, v)| !v.is_null())
                        .collect(),
                });
            assigned.insert(SymbolicRef::new(&descriptor.name, record.sequence), id.clone());
            results.push(RecordResult::Success(id));
        }

        Ok(results)
    }

    async fn bulk_update(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[(TargetId, ResolvedRecord)],
    ) -> anyhow::Result<Vec<RecordResult>> {
        let mut state = self.lock();
        state.journal.push(StoreCall::Update {
            entity_type: descriptor.name.clone(),
            ids: records.iter().map(|(id, _)| id.clone()).collect(),
        });
        state.check_failing(&descriptor.name)?;

        let mut results = Vec::with_capacity(records.len());
        for (id, record) in records {
            if let Some((field, token)) = record.first_pending_ref() {
                results.push(RecordResult::failure(
                    Some(field.as_str()),
                    format!("Unknown reference token {}", token),
                ));
                continue;
            }
            if let Some(field) = record.fields.keys().find(|f| descriptor.is_update_excluded(f)) {
                results.push(RecordResult::failure(
                    Some(field.as_str()),
                    "Unable to create/update fields: field is not updateable",
                ));
                continue;
            }
            if let Some(rejected) = state.rejection(&descriptor.name, &record.fields) {
                results.push(rejected);
                continue;
            }

            let stored = state
                .tables
                .get_mut(&descriptor.name)
                .and_then(|table| table.iter_mut().find(|r| &r.id == id));
            let Some(stored) = stored else {
                results.push(RecordResult::failure(None, "Entity is deleted"));
                continue;
            };
            for (name, value) in &record.fields {
                if value.is_null() {
                    stored.fields.remove(name);
                } else {
                    stored.fields.insert(name.clone(), value.clone());
                }
            }
            results.push(RecordResult::Success(id.clone()));
        }

        Ok(results)
    }
}

fn new_id(entity_type: &str) -> TargetId {
    let prefix: String = entity_type.chars().take(3).collect();
    TargetId::new(format!("{}-{}", prefix.to_lowercase(), Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDescriptor;
    use crate::transfer::StagedRecord;

    fn category() -> EntityTypeDescriptor {
        EntityTypeDescriptor::new("Category")
            .with_field(FieldDescriptor::new("Code").required())
            .with_field(FieldDescriptor::new("Name").required())
            .with_field(FieldDescriptor::reference("ParentId", "Category"))
            .with_natural_key(["Code"])
    }

    fn record(seq: usize, code: &str, parent: Option<SymbolicRef>) -> ResolvedRecord {
        let mut staged = StagedRecord::new("Category", seq)
            .with_field("Code", code)
            .with_field("Name", format!("Category {}", code));
        if let Some(parent) = parent {
            staged = staged.with_field("ParentId", Value::Ref(parent));
        }
        ResolvedRecord::from_staged(&staged, None)
    }

    #[tokio::test]
    async fn test_create_resolves_tokens_within_call() {
        let store = MemoryStore::new();
        let records = vec![
            record(1, "ROOT", None),
            record(2, "CHILD", Some(SymbolicRef::new("Category", 1))),
        ];

        let results = store.bulk_create(&category(), &records).await.unwrap();
        assert!(results.iter().all(RecordResult::is_success));

        let root_id = results[0].id().unwrap();
        let child = store.get("Category", results[1].id().unwrap()).unwrap();
        assert_eq!(child.fields.get("ParentId"), Some(&Value::Id(root_id.clone())));
    }

    #[tokio::test]
    async fn test_unknown_token_fails_record_only() {
        let store = MemoryStore::new();
        let records = vec![
            record(1, "CHILD", Some(SymbolicRef::new("Category", 9))),
            record(2, "OTHER", None),
        ];

        let results = store.bulk_create(&category(), &records).await.unwrap();
        assert!(matches!(&results[0], RecordResult::Failure { field: Some(f), .. } if f == "ParentId"));
        assert!(results[1].is_success());
        assert_eq!(store.count("Category"), 1);
    }

    #[tokio::test]
    async fn test_query_and_duplicate_guard() {
        let store = MemoryStore::new();
        store
            .bulk_create(&category(), &[record(1, "ROOT", None)])
            .await
            .unwrap();

        let found = store
            .query(
                &category(),
                &[NaturalKey::new(["ROOT"]), NaturalKey::new(["NOPE"])],
            )
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let again = store
            .bulk_create(&category(), &[record(2, "ROOT", None)])
            .await
            .unwrap();
        assert!(!again[0].is_success());
        assert_eq!(store.count("Category"), 1);
    }

    #[tokio::test]
    async fn test_update_refuses_immutable_fields() {
        let store = MemoryStore::new();
        let results = store
            .bulk_create(&category(), &[record(1, "ROOT", None)])
            .await
            .unwrap();
        let id = results[0].id().unwrap().clone();

        let mut full = record(1, "ROOT", None);
        let refused = store
            .bulk_update(&category(), &[(id.clone(), full.clone())])
            .await
            .unwrap();
        assert!(matches!(&refused[0], RecordResult::Failure { field: Some(f), .. } if f == "Code"));

        full.remove_field("Code");
        full.set_field("Name", Value::from("Renamed"));
        let updated = store.bulk_update(&category(), &[(id.clone(), full)]).await.unwrap();
        assert!(updated[0].is_success());
        assert_eq!(
            store.get("Category", &id).unwrap().fields.get("Name"),
            Some(&Value::from("Renamed"))
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.reject_records("Category", "Code", "BAD", "Invalid code");

        let results = store
            .bulk_create(&category(), &[record(1, "BAD", None), record(2, "GOOD", None)])
            .await
            .unwrap();
        assert!(!results[0].is_success());
        assert!(results[1].is_success());

        store.fail_entity("Category", "Service unavailable");
        let err = store.query(&category(), &[]).await.unwrap_err();
        assert!(err.to_string().contains("Service unavailable"));
        assert_eq!(store.journal().len(), 2);
    }
}
