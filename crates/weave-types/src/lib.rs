//! Weave Types - shared domain model for the governance engine
//!
//! Everything here is plain data: typed identifiers, organizational
//! entities, proposal records, objections, and version-history entries.
//! Behavior lives in the component crates.

#![deny(unsafe_code)]

mod history;
mod ids;
mod org;
mod proposal;

pub use history::{ChangeOp, EntitySnapshot, VersionHistoryEntry};
pub use ids::{
    AgendaItemId, AssignmentId, AttachmentId, CategoryId, CircleId, EvolutionId, FileId,
    HistoryEntryId, ItemId, MeetingId, ObjectionId, PersonId, ProposalId, RoleId, WorkspaceId,
};
pub use org::{
    Assignment, AssignmentStatus, Circle, CircleItem, CircleItemCategory, CircleType,
    DecisionModel, EntityKind, EntityStatus, OrgRef, Role,
};
pub use proposal::{
    ChangeKind, FieldChange, IntegrationState, Objection, Proposal, ProposalAttachment,
    ProposalEvolution, ProposalStatus, Validity,
};
