//! Load execution
//!
//! Runs load passes in order. Each entity type goes through:
//! hierarchy exclusion -> reference prefetch -> resolve -> plan against
//! existing records -> create -> update. Record-level problems are
//! collected in the outcome; a failed client call fails the type and skips
//! everything that depends on it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use chrono::Utc;

use crate::api::{RecordResult, TargetStoreClient};
use crate::schema::{EntityTypeDescriptor, FieldDescriptor, SchemaRegistry};

use super::dependency_graph::{DependencyGraph, GraphError, LoadPass};
use super::hierarchy::{HierarchyCheck, order_siblings, require_loaded_parent};
use super::outcome::{FailureReason, LoadOutcome, OutcomeStatus, RunReport};
use super::planner::{RejectReason, plan};
use super::resolver::{BatchRefs, resolve};
use super::types::{
    IdentityMap, NaturalKey, ResolvedRecord, StagedData, StagedRecord, SymbolicRef, TargetId, Value,
};

/// Tunables for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Look up referenced records that were not staged in this run
    pub lookup_external_references: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            lookup_external_references: true,
        }
    }
}

/// Shared flag asking a run to stop before its next entity type
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a load run over a registry
pub struct LoadOrchestrator<'a> {
    registry: &'a SchemaRegistry,
    graph: DependencyGraph,
    options: LoadOptions,
    cancel: CancellationFlag,
}

impl<'a> LoadOrchestrator<'a> {
    /// Build the dependency graph for `registry`
    pub fn new(registry: &'a SchemaRegistry) -> Result<Self, GraphError> {
        Ok(LoadOrchestrator {
            registry,
            graph: DependencyGraph::build(registry)?,
            options: LoadOptions::default(),
            cancel: CancellationFlag::new(),
        })
    }

    pub fn with_options(mut self, options: LoadOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Load passes for the registry
    pub fn passes(&self) -> Result<Vec<LoadPass>, GraphError> {
        self.graph.load_passes()
    }

    /// Run every pass with a fresh identity map
    pub async fn run(
        &self,
        passes: &[LoadPass],
        staged: &StagedData,
        client: &dyn TargetStoreClient,
    ) -> RunReport {
        let mut identity = IdentityMap::new();
        self.run_with_identity(passes, staged, client, &mut identity)
            .await
    }

    /// Run every pass, reading and extending `identity`
    pub async fn run_with_identity(
        &self,
        passes: &[LoadPass],
        staged: &StagedData,
        client: &dyn TargetStoreClient,
        identity: &mut IdentityMap,
    ) -> RunReport {
        let mut report = RunReport::new(passes.to_vec());
        let hierarchy = HierarchyCheck::run(self.registry, staged);

        for entity_type in staged.entity_types() {
            if !self.registry.contains(entity_type) {
                log::warn!("Staged data for unregistered type '{}' ignored", entity_type);
            }
        }

        // Entity type -> root cause it is skipped for
        let mut blocked: HashMap<String, String> = HashMap::new();

        for pass in passes {
            log::info!(
                "Pass {}/{}: {}",
                pass.index + 1,
                passes.len(),
                pass.entity_types.join(", ")
            );

            for entity_type in &pass.entity_types {
                let records = staged.get(entity_type);

                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    report.outcomes.push(LoadOutcome::skipped(
                        entity_type,
                        pass.index,
                        records.len(),
                        "run cancelled",
                    ));
                    continue;
                }

                if let Some(cause) = blocked.get(entity_type) {
                    log::warn!("Skipping {}: {}", entity_type, cause);
                    report.outcomes.push(LoadOutcome::skipped(
                        entity_type,
                        pass.index,
                        records.len(),
                        cause.clone(),
                    ));
                    continue;
                }

                let mut outcome = LoadOutcome::new(entity_type, pass.index);
                let result = match self.registry.describe(entity_type) {
                    Ok(descriptor) => {
                        self.load_entity(descriptor, records, &hierarchy, client, identity, &mut outcome)
                            .await
                    }
                    Err(err) => Err(err.into()),
                };

                if let Err(err) = result {
                    let cause = format!("{:#}", err);
                    log::error!("{} failed: {}", entity_type, cause);

                    outcome.skipped += records.len().saturating_sub(outcome.total());
                    outcome.status = OutcomeStatus::Failed(cause.clone());

                    let dependents: BTreeSet<String> = self.graph.transitive_dependents(entity_type);
                    for dependent in dependents {
                        blocked
                            .entry(dependent)
                            .or_insert_with(|| format!("depends on {}, which failed", entity_type));
                    }
                }

                report.outcomes.push(outcome);
            }
        }

        report.finished_at = Utc::now();
        let totals = report.totals();
        log::info!(
            "Run finished: created {}, updated {}, skipped {}, failed {}",
            totals.created,
            totals.updated,
            totals.skipped,
            totals.failed
        );
        report
    }

    async fn load_entity(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[StagedRecord],
        hierarchy: &HierarchyCheck,
        client: &dyn TargetStoreClient,
        identity: &mut IdentityMap,
        outcome: &mut LoadOutcome,
    ) -> anyhow::Result<()> {
        if records.is_empty() {
            log::debug!("{}: nothing staged", descriptor.name);
            return Ok(());
        }
        log::info!("Loading {} ({} staged)", descriptor.name, records.len());

        // Poisoned hierarchies never reach the store
        let mut eligible = Vec::with_capacity(records.len());
        for record in records {
            match hierarchy.conflict_for(descriptor, record) {
                Some(conflict) => outcome.fail_record(
                    record.sequence,
                    staged_label(descriptor, record),
                    FailureReason::SequenceConflict(conflict.clone()),
                ),
                None => eligible.push(record),
            }
        }

        if self.options.lookup_external_references {
            self.prefetch_references(descriptor, &eligible, client, identity)
                .await?;
        }

        let batch = BatchRefs::pending(descriptor, eligible.iter().copied(), identity);

        let mut resolved = Vec::with_capacity(eligible.len());
        for record in eligible {
            let result = resolve(descriptor, record, identity, &batch)
                .and_then(|r| require_loaded_parent(descriptor, &r).map(|_| r));
            match result {
                Ok(record) => {
                    for dropped in &record.dropped_refs {
                        outcome.warn_record(record.sequence, record.label(), dropped.clone());
                    }
                    resolved.push(record);
                }
                Err(err) => {
                    log::warn!("{}: {}", staged_label(descriptor, record), err);
                    outcome.fail_record(record.sequence, staged_label(descriptor, record), err);
                }
            }
        }
        order_siblings(descriptor, &mut resolved);

        let existing = self.query_existing(descriptor, &resolved, client).await?;
        let mut load_plan = plan(descriptor, resolved, &existing);

        for rejected in load_plan.rejected.drain(..) {
            log::warn!("{}: {}", rejected.record.label(), rejected.reason);
            outcome.fail_record(rejected.record.sequence, rejected.record.label(), rejected.reason);
        }

        // Confirmed-existing records are visible to later types right away
        let mut updates = Vec::with_capacity(load_plan.to_update.len());
        for (id, record) in load_plan.to_update {
            let published = match &record.reference_key {
                Some(key) => identity.insert(&descriptor.name, key.clone(), id.clone()),
                None => Ok(()),
            };
            if let Err(conflict) = published {
                outcome.fail_record(record.sequence, record.label(), conflict);
                continue;
            }
            updates.push((id, record));
        }

        let created_ids = self
            .create_records(descriptor, &load_plan.to_create, client, identity, outcome)
            .await?;

        let mut ready = Vec::with_capacity(updates.len());
        for (id, mut record) in updates {
            record.substitute_refs(&created_ids);
            if let Some((field, token)) = record.first_pending_ref() {
                outcome.fail_record(
                    record.sequence,
                    record.label(),
                    RejectReason::DanglingReference { field, token },
                );
                continue;
            }
            ready.push((id, record));
        }

        self.update_records(descriptor, &ready, client, outcome)
            .await?;

        log::info!(
            "{}: created {}, updated {}, failed {}",
            descriptor.name,
            outcome.created,
            outcome.updated,
            outcome.failed
        );
        Ok(())
    }

    /// Query the store for referenced records that are neither known nor staged
    async fn prefetch_references(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[&StagedRecord],
        client: &dyn TargetStoreClient,
        identity: &mut IdentityMap,
    ) -> anyhow::Result<()> {
        for field in descriptor.foreign_keys() {
            let Some(target) = self.prefetch_target(descriptor, field) else {
                continue;
            };

            let mut keys: Vec<NaturalKey> = Vec::new();
            for record in records {
                let Some(key) = field.reference_key(&record.fields) else {
                    continue;
                };
                if record.get(&field.name).and_then(Value::as_id).is_some()
                    || identity.contains(&target.name, &key)
                    || keys.contains(&key)
                {
                    continue;
                }
                keys.push(key);
            }
            if keys.is_empty() {
                continue;
            }

            log::debug!(
                "Looking up {} external {} reference(s) for {}.{}",
                keys.len(),
                target.name,
                descriptor.name,
                field.name
            );
            let found = client
                .query(target, &keys)
                .await
                .with_context(|| format!("Reference lookup into {} failed", target.name))?;
            for (key, id) in found {
                if let Err(conflict) = identity.insert(&target.name, key, id) {
                    log::warn!("Ignoring looked-up reference: {}", conflict);
                }
            }
        }
        Ok(())
    }

    /// Target type of a reference when its store key equals its staged key
    fn prefetch_target(
        &self,
        descriptor: &EntityTypeDescriptor,
        field: &FieldDescriptor,
    ) -> Option<&'a EntityTypeDescriptor> {
        let reference = field.reference.as_ref()?;
        if reference.target == descriptor.name || reference.scope_field.is_some() {
            return None;
        }
        let target = self.registry.describe(&reference.target).ok()?;
        if target.natural_key.len() != 1 || target.natural_key_has_references() {
            return None;
        }
        Some(target)
    }

    /// Ids of staged records already present in the store, by resolved key.
    ///
    /// Keys holding a batch token are only queried once the token's record
    /// is known to exist, so this repeats until no new keys turn up.
    async fn query_existing(
        &self,
        descriptor: &EntityTypeDescriptor,
        resolved: &[ResolvedRecord],
        client: &dyn TargetStoreClient,
    ) -> anyhow::Result<HashMap<NaturalKey, TargetId>> {
        let mut existing: HashMap<NaturalKey, TargetId> = HashMap::new();
        let mut known_tokens: HashMap<SymbolicRef, TargetId> = HashMap::new();
        let mut queried: HashSet<NaturalKey> = HashSet::new();

        loop {
            let keys: Vec<NaturalKey> = resolved
                .iter()
                .filter_map(|record| queryable_key(descriptor, record, &known_tokens))
                .filter(|key| queried.insert(key.clone()))
                .collect();
            if keys.is_empty() {
                break;
            }

            let found = client
                .query(descriptor, &keys)
                .await
                .with_context(|| format!("Lookup of existing {} records failed", descriptor.name))?;
            existing.extend(found);

            let before = known_tokens.len();
            for record in resolved {
                let id = queryable_key(descriptor, record, &known_tokens)
                    .and_then(|key| existing.get(&key).cloned());
                if let Some(id) = id {
                    known_tokens.insert(record.token(), id);
                }
            }
            if known_tokens.len() == before {
                break;
            }
        }

        Ok(existing)
    }

    async fn create_records(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[ResolvedRecord],
        client: &dyn TargetStoreClient,
        identity: &mut IdentityMap,
        outcome: &mut LoadOutcome,
    ) -> anyhow::Result<HashMap<SymbolicRef, TargetId>> {
        let mut created_ids = HashMap::new();
        if records.is_empty() {
            return Ok(created_ids);
        }

        let results = client
            .bulk_create(descriptor, records)
            .await
            .with_context(|| format!("Create of {} records failed", descriptor.name))?;
        check_result_count(&descriptor.name, records.len(), results.len())?;

        for (record, result) in records.iter().zip(results) {
            match result {
                RecordResult::Success(id) => {
                    created_ids.insert(record.token(), id.clone());
                    let published = match &record.reference_key {
                        Some(key) => identity.insert(&descriptor.name, key.clone(), id),
                        None => Ok(()),
                    };
                    match published {
                        Ok(()) => outcome.created += 1,
                        Err(conflict) => outcome.fail_record(record.sequence, record.label(), conflict),
                    }
                }
                RecordResult::Failure { field, message } => {
                    log::warn!("{}: {}", record.label(), message);
                    outcome.fail_record(
                        record.sequence,
                        record.label(),
                        FailureReason::Store { field, message },
                    );
                }
            }
        }
        Ok(created_ids)
    }

    async fn update_records(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[(TargetId, ResolvedRecord)],
        client: &dyn TargetStoreClient,
        outcome: &mut LoadOutcome,
    ) -> anyhow::Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let results = client
            .bulk_update(descriptor, records)
            .await
            .with_context(|| format!("Update of {} records failed", descriptor.name))?;
        check_result_count(&descriptor.name, records.len(), results.len())?;

        for ((_, record), result) in records.iter().zip(results) {
            match result {
                RecordResult::Success(_) => outcome.updated += 1,
                RecordResult::Failure { field, message } => {
                    log::warn!("{}: {}", record.label(), message);
                    outcome.fail_record(
                        record.sequence,
                        record.label(),
                        FailureReason::Store { field, message },
                    );
                }
            }
        }
        Ok(())
    }
}

/// Store-side key of a record once known tokens are replaced; `None`
/// while a key part still points at a record not known to exist
fn queryable_key(
    descriptor: &EntityTypeDescriptor,
    record: &ResolvedRecord,
    known_tokens: &HashMap<SymbolicRef, TargetId>,
) -> Option<NaturalKey> {
    if !descriptor.key_holds_token(record) {
        return descriptor.resolved_key(record);
    }

    let mut substituted = record.clone();
    substituted.substitute_refs(known_tokens);
    if descriptor.key_holds_token(&substituted) {
        return None;
    }
    descriptor.resolved_key(&substituted)
}

fn check_result_count(entity_type: &str, sent: usize, received: usize) -> anyhow::Result<()> {
    if sent != received {
        anyhow::bail!(
            "Store returned {} results for {} {} records",
            received,
            sent,
            entity_type
        );
    }
    Ok(())
}

fn staged_label(descriptor: &EntityTypeDescriptor, record: &StagedRecord) -> String {
    match descriptor.staged_key(record) {
        Some(key) => format!("{} #{} [{}]", record.entity_type, record.sequence, key),
        None => format!("{} #{}", record.entity_type, record.sequence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{MemoryStore, StoreCall};
    use crate::schema::{FieldDescriptor, builtin_registry};
    use crate::transfer::{DroppedReference, ResolutionError};

    fn scenario_registry() -> SchemaRegistry {
        SchemaRegistry::from_descriptors([
            EntityTypeDescriptor::new("Catalog")
                .with_field(FieldDescriptor::new("Code").required())
                .with_natural_key(["Code"]),
            EntityTypeDescriptor::new("Category")
                .with_field(FieldDescriptor::new("Code").required())
                .with_field(FieldDescriptor::reference("CatalogId", "Catalog").required())
                .with_field(FieldDescriptor::reference("ParentId", "Category"))
                .with_natural_key(["Code"]),
            EntityTypeDescriptor::new("Product")
                .with_field(FieldDescriptor::new("Sku").required())
                .with_field(FieldDescriptor::new("Name"))
                .with_field(FieldDescriptor::new("Family").create_only())
                .with_natural_key(["Sku"]),
            EntityTypeDescriptor::new("CategoryAssignment")
                .with_field(FieldDescriptor::reference("CategoryId", "Category").required())
                .with_field(FieldDescriptor::reference("ProductId", "Product").required())
                .with_natural_key(["CategoryId", "ProductId"]),
        ])
        .unwrap()
    }

    fn row(fields: &[(&str, &str)]) -> Vec<(String, Value)> {
        fields
            .iter()
            .map(|(k, v)| (k.to_string(), Value::from(*v)))
            .collect()
    }

    fn scenario_staged() -> StagedData {
        let mut staged = StagedData::new();
        staged.push("Catalog", row(&[("Code", "MAIN")]));
        staged.push("Category", row(&[("Code", "ROOT"), ("CatalogId", "MAIN")]));
        staged.push(
            "Category",
            row(&[("Code", "LAPTOPS"), ("CatalogId", "MAIN"), ("ParentId", "ROOT")]),
        );
        staged.push("Product", row(&[("Sku", "LAP-1"), ("Name", "Laptop"), ("Family", "HW")]));
        staged.push("Product", row(&[("Sku", "DOCK-1"), ("Name", "Dock"), ("Family", "HW")]));
        staged.push(
            "CategoryAssignment",
            row(&[("CategoryId", "LAPTOPS"), ("ProductId", "LAP-1")]),
        );
        staged.push(
            "CategoryAssignment",
            row(&[("CategoryId", "MISSING"), ("ProductId", "DOCK-1")]),
        );
        staged
    }

    async fn run(
        registry: &SchemaRegistry,
        staged: &StagedData,
        store: &MemoryStore,
    ) -> RunReport {
        let orchestrator = LoadOrchestrator::new(registry).unwrap();
        let passes = orchestrator.passes().unwrap();
        orchestrator.run(&passes, staged, store).await
    }

    #[tokio::test]
    async fn test_unresolved_reference_excludes_only_that_record() {
        let registry = scenario_registry();
        let store = MemoryStore::new();

        let report = run(&registry, &scenario_staged(), &store).await;

        let assignments = report.outcome("CategoryAssignment").unwrap();
        assert!(assignments.is_completed());
        assert_eq!(assignments.created, 1);
        assert_eq!(assignments.failed, 1);
        assert!(matches!(
            &assignments.failures[0].reason,
            FailureReason::Resolution(ResolutionError::UnresolvedReference { field, value, .. })
                if field == "CategoryId" && value == "MISSING"
        ));
        assert_eq!(store.count("CategoryAssignment"), 1);

        // Self-reference resolved within the batch
        let laptops = store
            .records("Category")
            .into_iter()
            .find(|r| r.fields.get("Code") == Some(&Value::from("LAPTOPS")))
            .unwrap();
        assert!(matches!(laptops.fields.get("ParentId"), Some(Value::Id(_))));
    }

    #[tokio::test]
    async fn test_second_run_only_updates() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let mut staged = StagedData::new();
        for n in 1..=10 {
            staged.push(
                "Product",
                row(&[("Sku", &format!("SKU-{}", n)), ("Name", "Widget"), ("Family", "HW")]),
            );
        }

        let first = run(&registry, &staged, &store).await;
        assert_eq!(first.outcome("Product").unwrap().created, 10);

        let second = run(&registry, &staged, &store).await;
        let products = second.outcome("Product").unwrap();
        assert_eq!(products.created, 0);
        assert_eq!(products.updated, 10);
        assert_eq!(products.failed, 0);
        assert_eq!(store.count("Product"), 10);
    }

    #[tokio::test]
    async fn test_full_rerun_is_idempotent() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let staged = scenario_staged();

        run(&registry, &staged, &store).await;
        let second = run(&registry, &staged, &store).await;

        assert_eq!(second.totals().created, 0);
        assert_eq!(second.totals().updated, 6);
        // The unresolvable assignment is reported again, never created
        assert_eq!(second.totals().failed, 1);
    }

    #[tokio::test]
    async fn test_failed_type_skips_dependents_only() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        store.fail_entity("Catalog", "Service unavailable");

        let report = run(&registry, &scenario_staged(), &store).await;

        let catalog = report.outcome("Catalog").unwrap();
        assert!(matches!(&catalog.status, OutcomeStatus::Failed(cause) if cause.contains("Service unavailable")));
        assert_eq!(catalog.skipped, 1);

        for dependent in ["Category", "CategoryAssignment"] {
            let outcome = report.outcome(dependent).unwrap();
            assert!(matches!(&outcome.status, OutcomeStatus::Skipped(cause) if cause.contains("Catalog")));
        }
        assert_eq!(report.outcome("Product").unwrap().created, 2);

        // Dependents never reached the store
        assert!(
            store
                .journal()
                .iter()
                .all(|call| call.entity_type() != "Category" && call.entity_type() != "CategoryAssignment")
        );
        assert!(report.has_failures());
    }

    #[tokio::test]
    async fn test_per_record_store_failure_is_not_fatal() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        store.reject_records("Product", "Sku", "DOCK-1", "Invalid SKU");

        let report = run(&registry, &scenario_staged(), &store).await;

        let products = report.outcome("Product").unwrap();
        assert!(products.is_completed());
        assert_eq!(products.created, 1);
        assert!(matches!(
            &products.failures[0].reason,
            FailureReason::Store { field: Some(field), .. } if field == "Sku"
        ));
        assert!(report.outcome("CategoryAssignment").unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_updates_never_resend_immutable_fields() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let mut staged = StagedData::new();
        staged.push("Product", row(&[("Sku", "LAP-1"), ("Name", "Laptop"), ("Family", "HW")]));
        run(&registry, &staged, &store).await;

        let mut renamed = StagedData::new();
        renamed.push("Product", row(&[("Sku", "LAP-1"), ("Name", "Laptop Pro"), ("Family", "SW")]));
        let report = run(&registry, &renamed, &store).await;

        assert_eq!(report.outcome("Product").unwrap().updated, 1);
        let stored = &store.records("Product")[0];
        assert_eq!(stored.fields.get("Name"), Some(&Value::from("Laptop Pro")));
        assert_eq!(stored.fields.get("Family"), Some(&Value::from("HW")));
    }

    fn category_staged(parent: Option<&str>) -> StagedData {
        let mut staged = StagedData::new();
        staged.push("ProductCatalog", row(&[("Name", "Main"), ("Code", "MAIN")]));
        staged.push(
            "ProductCategory",
            row(&[("Name", "Root"), ("Code", "ROOT"), ("CatalogId", "MAIN")]),
        );
        let mut laptops = row(&[("Name", "Laptops"), ("Code", "LAP"), ("CatalogId", "MAIN")]);
        if let Some(parent) = parent {
            laptops.push(("ParentCategoryId".to_string(), Value::from(parent)));
        }
        staged.push("ProductCategory", laptops);
        staged
    }

    #[tokio::test]
    async fn test_dropped_optional_reference_is_reported() {
        let registry = builtin_registry().unwrap();
        let store = MemoryStore::new();

        let report = run(&registry, &category_staged(Some("TYPO")), &store).await;

        let categories = report.outcome("ProductCategory").unwrap();
        assert_eq!(categories.created, 2);
        assert_eq!(categories.failed, 0);
        assert_eq!(categories.warnings.len(), 1);
        assert_eq!(
            categories.warnings[0].reason,
            FailureReason::DroppedReference(DroppedReference {
                field: "ParentCategoryId".into(),
                entity_type: "ProductCategory".into(),
                value: "TYPO".into(),
            })
        );
        assert!(!report.has_failures());
        assert_eq!(report.totals().warnings, 1);

        let json = serde_json::to_value(categories).unwrap();
        assert_eq!(json["warnings"][0]["reason"]["kind"], "dropped_reference");

        let laptops = store
            .records("ProductCategory")
            .into_iter()
            .find(|r| r.fields.get("Code") == Some(&Value::from("LAP")))
            .unwrap();
        assert!(matches!(
            laptops.fields.get("ParentCategoryId"),
            None | Some(Value::Null)
        ));
    }

    #[tokio::test]
    async fn test_dropped_reference_keeps_stored_parent_on_update() {
        let registry = builtin_registry().unwrap();
        let store = MemoryStore::new();
        run(&registry, &category_staged(Some("ROOT")), &store).await;

        let find = |code: &str| {
            store
                .records("ProductCategory")
                .into_iter()
                .find(|r| r.fields.get("Code") == Some(&Value::from(code)))
                .unwrap()
        };
        let root_id = find("ROOT").id;

        let report = run(&registry, &category_staged(Some("TYPO")), &store).await;

        let categories = report.outcome("ProductCategory").unwrap();
        assert_eq!(categories.updated, 2);
        assert_eq!(categories.warnings.len(), 1);
        assert_eq!(
            find("LAP").fields.get("ParentCategoryId"),
            Some(&Value::Id(root_id))
        );
    }

    #[tokio::test]
    async fn test_external_reference_prefetch() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("Code".to_string(), Value::from("MAIN"));
        let catalog_id = store.seed("Catalog", fields);

        let mut staged = StagedData::new();
        staged.push("Category", row(&[("Code", "ROOT"), ("CatalogId", "MAIN")]));

        let report = run(&registry, &staged, &store).await;
        assert_eq!(report.outcome("Category").unwrap().created, 1);
        assert_eq!(
            store.records("Category")[0].fields.get("CatalogId"),
            Some(&Value::Id(catalog_id))
        );

        // Without the lookup the reference cannot resolve
        let orchestrator = LoadOrchestrator::new(&registry).unwrap().with_options(LoadOptions {
            lookup_external_references: false,
        });
        let passes = orchestrator.passes().unwrap();
        let mut fresh = StagedData::new();
        fresh.push("Category", row(&[("Code", "OTHER"), ("CatalogId", "MAIN")]));
        let report = orchestrator.run(&passes, &fresh, &store).await;
        assert_eq!(report.outcome("Category").unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_remaining_types() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let orchestrator = LoadOrchestrator::new(&registry)
            .unwrap()
            .with_cancellation(cancel.clone());
        let passes = orchestrator.passes().unwrap();
        let report = orchestrator.run(&passes, &scenario_staged(), &store).await;

        assert!(report.cancelled);
        assert!(
            report
                .outcomes
                .iter()
                .all(|o| o.status == OutcomeStatus::Skipped("run cancelled".into()))
        );
        assert!(store.journal().is_empty());
    }

    fn bundle_staged() -> StagedData {
        let mut staged = StagedData::new();
        for sku in ["BUNDLE-1", "PART-A", "PART-B"] {
            staged.push(
                "Product2",
                row(&[("Name", sku), ("StockKeepingUnit", sku)]),
            );
        }
        for (name, seq) in [("Core", 10i64), ("Extras", 20)] {
            staged.push(
                "ProductComponentGroup",
                [
                    ("ParentProductId".to_string(), Value::from("BUNDLE-1")),
                    ("Name".to_string(), Value::from(name)),
                    ("Sequence".to_string(), Value::Int(seq)),
                ],
            );
        }
        for (child, group, seq) in [("PART-A", 10i64, 1i64), ("PART-B", 20, 2)] {
            staged.push(
                "ProductRelatedComponent",
                [
                    ("ParentProductId".to_string(), Value::from("BUNDLE-1")),
                    ("ChildProductId".to_string(), Value::from(child)),
                    ("ProductComponentGroupId".to_string(), Value::Int(group)),
                    ("Sequence".to_string(), Value::Int(seq)),
                ],
            );
        }
        staged
    }

    #[tokio::test]
    async fn test_bundle_components_load_after_groups() {
        let registry = builtin_registry().unwrap();
        let store = MemoryStore::new();

        let report = run(&registry, &bundle_staged(), &store).await;

        assert_eq!(report.outcome("ProductComponentGroup").unwrap().created, 2);
        assert_eq!(report.outcome("ProductRelatedComponent").unwrap().created, 2);

        let journal = store.journal();
        let position = |entity: &str| {
            journal
                .iter()
                .position(|call| matches!(call, StoreCall::Create { entity_type, .. } if entity_type == entity))
                .unwrap()
        };
        assert!(position("ProductComponentGroup") < position("ProductRelatedComponent"));

        let extras = store
            .records("ProductComponentGroup")
            .into_iter()
            .find(|r| r.fields.get("Sequence") == Some(&Value::Int(20)))
            .unwrap();
        let part_b = store
            .records("ProductRelatedComponent")
            .into_iter()
            .find(|r| r.fields.get("Sequence") == Some(&Value::Int(2)))
            .unwrap();
        assert_eq!(
            part_b.fields.get("ProductComponentGroupId"),
            Some(&Value::Id(extras.id))
        );
    }

    #[tokio::test]
    async fn test_failed_group_leaves_component_unresolved() {
        let registry = builtin_registry().unwrap();
        let store = MemoryStore::new();
        store.reject_records("ProductComponentGroup", "Sequence", 20i64, "Storage limit exceeded");

        let report = run(&registry, &bundle_staged(), &store).await;

        assert_eq!(report.outcome("ProductComponentGroup").unwrap().created, 1);
        let components = report.outcome("ProductRelatedComponent").unwrap();
        assert_eq!(components.created, 1);
        assert_eq!(components.failed, 1);
        assert!(matches!(
            &components.failures[0].reason,
            FailureReason::Resolution(ResolutionError::UnresolvedReference { field, .. })
                if field == "ProductComponentGroupId"
        ));

        // Only the component whose group loaded was submitted
        let submitted: Vec<usize> = store
            .journal()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::Create { entity_type, sequences } if entity_type == "ProductRelatedComponent" => {
                    Some(sequences)
                }
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(submitted, vec![1]);
    }

    #[tokio::test]
    async fn test_sequence_conflict_blocks_parent_hierarchy() {
        let registry = builtin_registry().unwrap();
        let store = MemoryStore::new();
        let mut staged = bundle_staged();
        staged.push(
            "ProductComponentGroup",
            [
                ("ParentProductId".to_string(), Value::from("BUNDLE-1")),
                ("Name".to_string(), Value::from("Duplicate")),
                ("Sequence".to_string(), Value::Int(20)),
            ],
        );

        let report = run(&registry, &staged, &store).await;

        let groups = report.outcome("ProductComponentGroup").unwrap();
        assert_eq!(groups.created, 0);
        assert_eq!(groups.failed, 3);
        let components = report.outcome("ProductRelatedComponent").unwrap();
        assert_eq!(components.failed, 2);
        assert!(
            components
                .failures
                .iter()
                .all(|f| matches!(f.reason, FailureReason::SequenceConflict(_)))
        );
        assert_eq!(store.count("ProductComponentGroup"), 0);
        assert_eq!(report.outcome("Product2").unwrap().created, 3);
    }

    #[tokio::test]
    async fn test_identity_map_is_extended() {
        let registry = scenario_registry();
        let store = MemoryStore::new();
        let orchestrator = LoadOrchestrator::new(&registry).unwrap();
        let passes = orchestrator.passes().unwrap();
        let mut identity = IdentityMap::new();

        orchestrator
            .run_with_identity(&passes, &scenario_staged(), &store, &mut identity)
            .await;

        assert!(identity.contains("Category", &NaturalKey::new(["LAPTOPS"])));
        assert!(identity.contains("Product", &NaturalKey::new(["DOCK-1"])));
        assert_eq!(identity.count("CategoryAssignment"), 1);
    }
}
