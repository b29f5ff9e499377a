//! Version-history records: immutable snapshots of entity mutations.

use crate::ids::{HistoryEntryId, PersonId, ProposalId, WorkspaceId};
use crate::org::{Assignment, Circle, CircleItem, EntityKind, Role};
use serde::{Deserialize, Serialize};

/// The operation a history entry records.
///
/// Archive and restore are derived from the archived-at flip; entities are
/// never physically deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Create,
    Update,
    Archive,
    Restore,
}

/// Full state of one tracked entity at a point in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntitySnapshot {
    Circle(Circle),
    Role(Role),
    Assignment(Assignment),
    Item(CircleItem),
}

impl EntitySnapshot {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntitySnapshot::Circle(_) => EntityKind::Circle,
            EntitySnapshot::Role(_) => EntityKind::Role,
            EntitySnapshot::Assignment(_) => EntityKind::Assignment,
            EntitySnapshot::Item(_) => EntityKind::Item,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            EntitySnapshot::Circle(c) => &c.id.0,
            EntitySnapshot::Role(r) => &r.id.0,
            EntitySnapshot::Assignment(a) => &a.id.0,
            EntitySnapshot::Item(i) => &i.id.0,
        }
    }

    pub fn is_archived(&self) -> bool {
        match self {
            EntitySnapshot::Circle(c) => c.is_archived(),
            EntitySnapshot::Role(r) => r.is_archived(),
            EntitySnapshot::Assignment(a) => a.is_archived(),
            EntitySnapshot::Item(i) => i.is_archived(),
        }
    }
}

/// One write-once record of one mutation to one tracked entity.
///
/// The full mutation history of an entity is the ordered list of its
/// entries; replaying the `after` snapshots in order reconstructs every
/// historical state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionHistoryEntry {
    pub id: HistoryEntryId,
    pub workspace_id: WorkspaceId,
    pub entity_kind: EntityKind,
    /// Raw id string of the mutated entity.
    pub entity_id: String,
    pub change: ChangeOp,
    /// Absent for create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<EntitySnapshot>,
    /// Absent only when an entry records a hard removal, which this core
    /// never performs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<EntitySnapshot>,
    pub changed_by: PersonId,
    pub changed_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Set when the mutation was applied by adopting a proposal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<ProposalId>,
}

impl VersionHistoryEntry {
    /// Derive the change op from the before/after pair, matching how the
    /// archived-at flip is interpreted.
    pub fn derive_op(before: Option<&EntitySnapshot>, after: Option<&EntitySnapshot>) -> ChangeOp {
        match (before, after) {
            (None, _) => ChangeOp::Create,
            (Some(b), Some(a)) => {
                if !b.is_archived() && a.is_archived() {
                    ChangeOp::Archive
                } else if b.is_archived() && !a.is_archived() {
                    ChangeOp::Restore
                } else {
                    ChangeOp::Update
                }
            }
            (Some(_), None) => ChangeOp::Archive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CircleId;
    use crate::org::EntityStatus;

    fn circle(archived: bool) -> EntitySnapshot {
        let now = chrono::Utc::now();
        EntitySnapshot::Circle(Circle {
            id: CircleId::new("c1"),
            workspace_id: WorkspaceId::new("w1"),
            name: "Ops".to_string(),
            slug: "ops".to_string(),
            purpose: None,
            parent_circle_id: None,
            status: EntityStatus::Active,
            circle_type: None,
            decision_model: None,
            version: 1,
            created_by: PersonId::new("p1"),
            created_at: now,
            updated_at: now,
            updated_by: None,
            archived_at: archived.then(chrono::Utc::now),
            archived_by: None,
        })
    }

    #[test]
    fn derive_op_from_archived_flip() {
        let active = circle(false);
        let archived = circle(true);

        assert_eq!(VersionHistoryEntry::derive_op(None, Some(&active)), ChangeOp::Create);
        assert_eq!(
            VersionHistoryEntry::derive_op(Some(&active), Some(&active)),
            ChangeOp::Update
        );
        assert_eq!(
            VersionHistoryEntry::derive_op(Some(&active), Some(&archived)),
            ChangeOp::Archive
        );
        assert_eq!(
            VersionHistoryEntry::derive_op(Some(&archived), Some(&active)),
            ChangeOp::Restore
        );
    }
}
