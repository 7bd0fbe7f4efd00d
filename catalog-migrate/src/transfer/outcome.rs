//! Load outcomes and the run report

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use super::dependency_graph::LoadPass;
use super::hierarchy::SequenceConflict;
use super::planner::RejectReason;
use super::resolver::ResolutionError;
use super::types::{DroppedReference, IdentityConflict};

/// Why a single record did not load
#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    Resolution(ResolutionError),
    Rejected(RejectReason),
    SequenceConflict(SequenceConflict),
    /// The store refused the record
    Store {
        field: Option<String>,
        message: String,
    },
    IdentityConflict(IdentityConflict),
    /// Loaded, but an optional reference matched nothing and was left empty
    DroppedReference(DroppedReference),
}

impl FailureReason {
    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            FailureReason::Resolution(_) => "resolution",
            FailureReason::Rejected(_) => "rejected",
            FailureReason::SequenceConflict(_) => "sequence_conflict",
            FailureReason::Store { .. } => "store",
            FailureReason::IdentityConflict(_) => "identity_conflict",
            FailureReason::DroppedReference(_) => "dropped_reference",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Resolution(err) => write!(f, "{}", err),
            FailureReason::Rejected(reason) => write!(f, "{}", reason),
            FailureReason::SequenceConflict(conflict) => write!(f, "{}", conflict),
            FailureReason::Store {
                field: Some(field),
                message,
            } => write!(f, "Store error on {}: {}", field, message),
            FailureReason::Store {
                field: None,
                message,
            } => write!(f, "Store error: {}", message),
            FailureReason::IdentityConflict(conflict) => write!(f, "{}", conflict),
            FailureReason::DroppedReference(dropped) => write!(f, "{}", dropped),
        }
    }
}

impl Serialize for FailureReason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FailureReason", 2)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl From<ResolutionError> for FailureReason {
    fn from(err: ResolutionError) -> Self {
        FailureReason::Resolution(err)
    }
}

impl From<RejectReason> for FailureReason {
    fn from(reason: RejectReason) -> Self {
        FailureReason::Rejected(reason)
    }
}

impl From<IdentityConflict> for FailureReason {
    fn from(conflict: IdentityConflict) -> Self {
        FailureReason::IdentityConflict(conflict)
    }
}

impl From<DroppedReference> for FailureReason {
    fn from(dropped: DroppedReference) -> Self {
        FailureReason::DroppedReference(dropped)
    }
}

/// One record that did not load, or loaded with a warning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
    /// Staged row sequence
    pub sequence: usize,
    /// Human label, e.g. `Product2 #3 [SKU-1]`
    pub record: String,
    pub reason: FailureReason,
}

/// How loading an entity type ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// Every client call returned; individual records may still have failed
    Completed,
    /// A client call failed for the whole type
    Failed(String),
    /// Not attempted (upstream failure or cancellation)
    Skipped(String),
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Completed => write!(f, "completed"),
            OutcomeStatus::Failed(cause) => write!(f, "failed: {}", cause),
            OutcomeStatus::Skipped(cause) => write!(f, "skipped: {}", cause),
        }
    }
}

/// Result of loading one entity type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub entity_type: String,
    pub pass: usize,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    pub created: usize,
    pub updated: usize,
    /// Records not attempted because the type failed or was skipped
    pub skipped: usize,
    pub failed: usize,
    pub failures: Vec<RecordFailure>,
    /// Records that loaded with something left out
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<RecordFailure>,
}

impl LoadOutcome {
    pub fn new(entity_type: impl Into<String>, pass: usize) -> Self {
        LoadOutcome {
            entity_type: entity_type.into(),
            pass,
            status: OutcomeStatus::Completed,
            created: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            failures: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Outcome for a type that was never attempted
    pub fn skipped(
        entity_type: impl Into<String>,
        pass: usize,
        records: usize,
        cause: impl Into<String>,
    ) -> Self {
        LoadOutcome {
            status: OutcomeStatus::Skipped(cause.into()),
            skipped: records,
            ..Self::new(entity_type, pass)
        }
    }

    /// Record a per-record failure
    pub fn fail_record(
        &mut self,
        sequence: usize,
        record: impl Into<String>,
        reason: impl Into<FailureReason>,
    ) {
        self.failed += 1;
        self.failures.push(RecordFailure {
            sequence,
            record: record.into(),
            reason: reason.into(),
        });
    }

    /// Record a warning for a record that still loads
    pub fn warn_record(
        &mut self,
        sequence: usize,
        record: impl Into<String>,
        reason: impl Into<FailureReason>,
    ) {
        self.warnings.push(RecordFailure {
            sequence,
            record: record.into(),
            reason: reason.into(),
        });
    }

    pub fn is_completed(&self) -> bool {
        self.status == OutcomeStatus::Completed
    }

    /// Records accounted for
    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.failed
    }
}

/// Summed counts over a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub warnings: usize,
}

/// Everything a load run did, in load order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub passes: Vec<LoadPass>,
    pub outcomes: Vec<LoadOutcome>,
    pub cancelled: bool,
}

impl RunReport {
    pub fn new(passes: Vec<LoadPass>) -> Self {
        let now = Utc::now();
        RunReport {
            started_at: now,
            finished_at: now,
            passes,
            outcomes: Vec::new(),
            cancelled: false,
        }
    }

    /// Outcome of one entity type
    pub fn outcome(&self, entity_type: &str) -> Option<&LoadOutcome> {
        self.outcomes.iter().find(|o| o.entity_type == entity_type)
    }

    pub fn totals(&self) -> Totals {
        self.outcomes.iter().fold(Totals::default(), |acc, o| Totals {
            created: acc.created + o.created,
            updated: acc.updated + o.updated,
            skipped: acc.skipped + o.skipped,
            failed: acc.failed + o.failed,
            warnings: acc.warnings + o.warnings.len(),
        })
    }

    /// True if any record failed or any type did not complete
    pub fn has_failures(&self) -> bool {
        self.cancelled || self.outcomes.iter().any(|o| o.failed > 0 || !o.is_completed())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for outcome in &self.outcomes {
            writeln!(
                f,
                "[pass {}] {}: {} (created {}, updated {}, skipped {}, failed {})",
                outcome.pass + 1,
                outcome.entity_type,
                outcome.status,
                outcome.created,
                outcome.updated,
                outcome.skipped,
                outcome.failed
            )?;
            for failure in &outcome.failures {
                writeln!(f, "    {}: {}", failure.record, failure.reason)?;
            }
            for warning in &outcome.warnings {
                writeln!(f, "    warning: {}: {}", warning.record, warning.reason)?;
            }
        }
        let totals = self.totals();
        write!(
            f,
            "Total: created {}, updated {}, skipped {}, failed {}",
            totals.created, totals.updated, totals.skipped, totals.failed
        )
    }
}
