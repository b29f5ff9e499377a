//! Weave Org - the organizational structure store
//!
//! Circles, roles, assignments, and circle items live in flat, id-keyed
//! tables (arena style). Circles reference their parent by id and the
//! store enforces "no cycles in parent links" as a data invariant on
//! every structural mutation. Nothing is ever physically deleted:
//! archival flips archived_at/archived_by, and every read path takes an
//! explicit [`ActiveFilter`] so archived rows are never omitted by
//! surprise. Every mutation records a version-history entry through the
//! shared recorder as an explicit step inside the same guarded section,
//! so the entity trail is complete whether or not a proposal drove the
//! change.

#![deny(unsafe_code)]

mod directory;
mod fields;
mod slug;

pub use directory::{AppliedChange, NewCircle, NewRole, OrgDirectory};
pub use slug::slugify;

use thiserror::Error;

/// Whether a read should see archived entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActiveFilter {
    ActiveOnly,
    IncludeArchived,
}

/// Org store errors.
#[derive(Debug, Error)]
pub enum OrgError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Entity is archived: {0}")]
    EntityArchived(String),

    #[error("Entity belongs to a different workspace: {0}")]
    WorkspaceMismatch(String),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for field {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Parent link would create a cycle through circle {0}")]
    CycleDetected(String),

    #[error(transparent)]
    History(#[from] weave_history::HistoryError),

    #[error("Lock error")]
    LockError,
}

impl OrgError {
    /// Conflicts the commit boundary may retry once before surfacing.
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, OrgError::VersionConflict { .. })
    }
}

/// Commit boundary: run an org mutation, retrying a write conflict once.
/// Any second failure (or any non-conflict failure) is surfaced as-is.
pub fn commit_with_retry<T>(
    mut op: impl FnMut() -> Result<T, OrgError>,
) -> Result<T, OrgError> {
    match op() {
        Err(ref e) if e.is_write_conflict() => {
            tracing::warn!(error = %e, "write conflict, retrying commit once");
            op()
        }
        other => other,
    }
}
