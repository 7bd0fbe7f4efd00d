//! Staged data loading
//!
//! Takes staged records for a set of entity types and loads them into a
//! target store in dependency order, reusing existing records by natural key
//! so a run can be repeated safely.

mod dependency_graph;
pub mod hierarchy;
mod orchestrator;
mod outcome;
pub mod planner;
pub mod resolver;
pub mod staging;
mod types;

pub use dependency_graph::{DependencyGraph, GraphError, LoadPass};
pub use hierarchy::{ConflictKind, HierarchyCheck, SequenceConflict};
pub use orchestrator::{CancellationFlag, LoadOptions, LoadOrchestrator};
pub use outcome::{FailureReason, LoadOutcome, OutcomeStatus, RecordFailure, RunReport, Totals};
pub use planner::{LoadPlan, RejectReason, RejectedRecord, plan};
pub use resolver::{BatchRefs, ResolutionError, resolve};
pub use staging::{CsvDirectorySource, StagingSource, WorkbookSource};
pub use types::*;
