//! Weave Proposals - the governance proposal lifecycle
//!
//! Owns the proposal state machine and everything that hangs off a
//! proposal: its evolutions (field-level diffs), attachments, and the
//! gating of closure on the objection ledger. Adoption applies the
//! proposal's evolutions to the target entity and records the resulting
//! diff in the version history, all or nothing.

#![deny(unsafe_code)]

mod manager;

pub use manager::{NewProposal, ProposalLifecycleManager};

use thiserror::Error;
use weave_history::HistoryError;
use weave_objections::ObjectionError;
use weave_types::ProposalStatus;

/// Lifecycle errors. Guard failures are typed and side-effect-free: the
/// caller re-reads state and decides, nothing retries a guard.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Proposal not found: {0}")]
    ProposalNotFound(String),

    #[error("Cannot {action} a proposal in status {from}")]
    InvalidTransition {
        from: ProposalStatus,
        action: &'static str,
    },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Target entity not found: {0}")]
    EntityNotFound(String),

    #[error("Target belongs to a different workspace: {0}")]
    WorkspaceMismatch(String),

    #[error("Agenda item {0} is not on the meeting's agenda")]
    AgendaItemNotFound(String),

    #[error("Proposal {0} has no field changes to adopt")]
    NoChanges(String),

    #[error("Objection {0} requires an amendment recorded after it was raised")]
    AmendmentRequired(String),

    #[error("Attachment not found: {0}")]
    AttachmentNotFound(String),

    #[error("Target entity changed underneath the proposal: {0}")]
    TargetEntityConflict(String),

    #[error(transparent)]
    Objection(#[from] ObjectionError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("Lock error")]
    LockError,
}
