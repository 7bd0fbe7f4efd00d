//! Idempotent load planning
//!
//! Splits the resolved records of one entity type into records to create,
//! records to update (with their existing target id) and rejected records.
//! Running the same plan twice against the same store turns every create of
//! the first run into an update on the second.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::schema::EntityTypeDescriptor;

use super::types::{NaturalKey, ResolvedRecord, SymbolicRef, TargetId};

/// Why the planner refused a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// One or more natural key fields have no value
    MissingNaturalKey { fields: Vec<String> },
    /// Another record of the batch already claimed this key
    DuplicateNaturalKey { key: NaturalKey, first_sequence: usize },
    /// A symbolic reference names a record that will not be created
    DanglingReference { field: String, token: SymbolicRef },
    /// Records of the batch reference each other in a loop
    CyclicReference { field: String, token: SymbolicRef },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::MissingNaturalKey { fields } => {
                write!(f, "Missing natural key: {}", fields.join(", "))
            }
            RejectReason::DuplicateNaturalKey {
                key,
                first_sequence,
            } => {
                write!(
                    f,
                    "Duplicate natural key [{}], already staged at row {}",
                    key, first_sequence
                )
            }
            RejectReason::DanglingReference { field, token } => {
                write!(f, "{} points at {} which is not being created", field, token)
            }
            RejectReason::CyclicReference { field, token } => {
                write!(f, "{} points at {} in a reference cycle", field, token)
            }
        }
    }
}

/// A record the planner refused
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRecord {
    pub record: ResolvedRecord,
    pub reason: RejectReason,
}

/// Create/update split for one entity type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPlan {
    /// Records to create, parents before children
    pub to_create: Vec<ResolvedRecord>,
    /// Records that already exist, with update-excluded fields stripped
    pub to_update: Vec<(TargetId, ResolvedRecord)>,
    pub rejected: Vec<RejectedRecord>,
}

impl LoadPlan {
    /// Total records accounted for by the plan
    pub fn len(&self) -> usize {
        self.to_create.len() + self.to_update.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plan the load of one entity type.
///
/// `existing` maps natural keys (as held by the store, so reference parts
/// are target ids) to the ids of records already present.
pub fn plan(
    descriptor: &EntityTypeDescriptor,
    records: Vec<ResolvedRecord>,
    existing: &HashMap<NaturalKey, TargetId>,
) -> LoadPlan {
    let mut routing = Routing::default();

    // Records whose key still holds a token wait until the token's record
    // is routed; an update-routed parent turns the token into an id
    let mut pending = records;
    loop {
        let mut waiting = Vec::new();
        let mut routed_any = false;

        for mut record in pending {
            record.substitute_refs(&routing.existing_tokens);
            if descriptor.key_holds_token(&record) {
                waiting.push(record);
                continue;
            }
            routed_any = true;
            routing.route(descriptor, record, existing);
        }

        pending = waiting;
        if pending.is_empty() || !routed_any {
            break;
        }
    }

    // Keys still holding tokens belong under records that are new, so the
    // record itself cannot exist yet
    for record in pending {
        routing.route(descriptor, record, &HashMap::new());
    }

    let Routing {
        existing_tokens,
        mut creates,
        mut updates,
        rejected,
        ..
    } = routing;
    let mut plan = LoadPlan {
        rejected,
        ..LoadPlan::default()
    };

    for record in creates.iter_mut() {
        record.substitute_refs(&existing_tokens);
    }
    for (_, record) in updates.iter_mut() {
        record.substitute_refs(&existing_tokens);
    }

    let (ordered, create_rejects) = order_creates(creates);
    plan.rejected.extend(create_rejects);

    let created: HashSet<SymbolicRef> = ordered.iter().map(ResolvedRecord::token).collect();
    for (id, mut record) in updates {
        let dangling = record
            .symbolic_refs()
            .find(|(_, token)| !created.contains(*token))
            .map(|(field, token)| (field.to_string(), token.clone()));
        if let Some((field, token)) = dangling {
            plan.rejected.push(RejectedRecord {
                record,
                reason: RejectReason::DanglingReference { field, token },
            });
            continue;
        }
        strip_update_excluded(descriptor, &mut record);
        plan.to_update.push((id, record));
    }

    plan.to_create = ordered;
    plan.rejected.sort_by_key(|r| r.record.sequence);

    log::debug!(
        "Planned {}: {} to create, {} to update, {} rejected",
        descriptor.name,
        plan.to_create.len(),
        plan.to_update.len(),
        plan.rejected.len()
    );

    plan
}

/// Routing state while records are split into creates and updates
#[derive(Default)]
struct Routing {
    /// Natural key -> sequence of the first record that claimed it
    seen: HashMap<NaturalKey, usize>,
    /// Tokens of batch records that turned out to exist already
    existing_tokens: HashMap<SymbolicRef, TargetId>,
    creates: Vec<ResolvedRecord>,
    updates: Vec<(TargetId, ResolvedRecord)>,
    rejected: Vec<RejectedRecord>,
}

impl Routing {
    fn route(
        &mut self,
        descriptor: &EntityTypeDescriptor,
        record: ResolvedRecord,
        existing: &HashMap<NaturalKey, TargetId>,
    ) {
        let Some(key) = descriptor.resolved_key(&record) else {
            let fields = descriptor.missing_key_fields(&record.fields);
            self.rejected.push(RejectedRecord {
                record,
                reason: RejectReason::MissingNaturalKey { fields },
            });
            return;
        };

        if let Some(&first_sequence) = self.seen.get(&key) {
            self.rejected.push(RejectedRecord {
                record,
                reason: RejectReason::DuplicateNaturalKey {
                    key,
                    first_sequence,
                },
            });
            return;
        }
        self.seen.insert(key.clone(), record.sequence);

        match existing.get(&key) {
            Some(id) => {
                self.existing_tokens.insert(record.token(), id.clone());
                self.updates.push((id.clone(), record));
            }
            None => self.creates.push(record),
        }
    }
}

/// Remove the natural key, create-only fields and dropped references from an
/// update payload. A dropped reference keeps whatever the store holds.
fn strip_update_excluded(descriptor: &EntityTypeDescriptor, record: &mut ResolvedRecord) {
    let dropped: Vec<String> = record.dropped_refs.iter().map(|d| d.field.clone()).collect();
    record
        .fields
        .retain(|name, _| !descriptor.is_update_excluded(name) && !dropped.contains(name));
}

/// Stable topological order over symbolic references.
///
/// Records pointing at tokens outside the create set are rejected as
/// dangling, which cascades to their own dependents. Whatever cannot be
/// ordered after that is part of a cycle.
fn order_creates(creates: Vec<ResolvedRecord>) -> (Vec<ResolvedRecord>, Vec<RejectedRecord>) {
    let mut rejected = Vec::new();
    let mut remaining = creates;

    loop {
        let tokens: HashSet<SymbolicRef> = remaining.iter().map(ResolvedRecord::token).collect();
        let (kept, dangling): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|record| {
            record
                .symbolic_refs()
                .all(|(_, token)| tokens.contains(token))
        });
        remaining = kept;
        if dangling.is_empty() {
            break;
        }
        for record in dangling {
            let (field, token) = record
                .symbolic_refs()
                .find(|(_, token)| !tokens.contains(*token))
                .map(|(field, token)| (field.to_string(), token.clone()))
                .unwrap_or_default();
            rejected.push(RejectedRecord {
                record,
                reason: RejectReason::DanglingReference { field, token },
            });
        }
    }

    let mut ordered: Vec<ResolvedRecord> = Vec::with_capacity(remaining.len());
    let mut emitted: HashSet<SymbolicRef> = HashSet::new();

    loop {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining.into_iter().partition(|record| {
            record
                .symbolic_refs()
                .all(|(_, token)| emitted.contains(token))
        });
        remaining = blocked;
        if ready.is_empty() {
            break;
        }
        for record in ready {
            emitted.insert(record.token());
            ordered.push(record);
        }
    }

    for record in remaining {
        let (field, token) = record
            .symbolic_refs()
            .find(|(_, token)| !emitted.contains(*token))
            .map(|(field, token)| (field.to_string(), token.clone()))
            .unwrap_or_default();
        rejected.push(RejectedRecord {
            record,
            reason: RejectReason::CyclicReference { field, token },
        });
    }

    (ordered, rejected)
}
