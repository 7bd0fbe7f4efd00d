//! Target store client interface

use std::collections::HashMap;

use async_trait::async_trait;

use crate::schema::EntityTypeDescriptor;
use crate::transfer::{NaturalKey, ResolvedRecord, TargetId};

/// Per-record result of a create or update call, in request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordResult {
    Success(TargetId),
    Failure {
        /// Field the store blamed, if any
        field: Option<String>,
        message: String,
    },
}

impl RecordResult {
    pub fn failure(field: Option<&str>, message: impl Into<String>) -> Self {
        RecordResult::Failure {
            field: field.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RecordResult::Success(_))
    }

    pub fn id(&self) -> Option<&TargetId> {
        match self {
            RecordResult::Success(id) => Some(id),
            RecordResult::Failure { .. } => None,
        }
    }
}

/// Remote store the catalog is loaded into.
///
/// An `Err` from any method means the whole call failed (transport, auth,
/// malformed response); per-record problems come back as
/// [`RecordResult::Failure`] entries instead.
#[async_trait]
pub trait TargetStoreClient: Send + Sync {
    /// Find existing records by natural key.
    ///
    /// Keys are given as the store holds them (reference parts are target
    /// ids). Keys with no matching record are absent from the result.
    async fn query(
        &self,
        descriptor: &EntityTypeDescriptor,
        keys: &[NaturalKey],
    ) -> anyhow::Result<HashMap<NaturalKey, TargetId>>;

    /// Create records, returning one result per record in order.
    ///
    /// Records may hold symbolic tokens pointing at earlier records of the
    /// same call; the client substitutes the ids it assigns.
    async fn bulk_create(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[ResolvedRecord],
    ) -> anyhow::Result<Vec<RecordResult>>;

    /// Update existing records, returning one result per record in order
    async fn bulk_update(
        &self,
        descriptor: &EntityTypeDescriptor,
        records: &[(TargetId, ResolvedRecord)],
    ) -> anyhow::Result<Vec<RecordResult>>;
}
