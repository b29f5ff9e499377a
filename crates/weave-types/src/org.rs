//! Organizational entities: circles, roles, assignments, circle items.
//!
//! Entities are stored arena-style, keyed by id, and reference each other
//! by id only. Archival is a lifecycle state (archived_at/archived_by),
//! never a physical delete.

use crate::ids::{
    AssignmentId, CategoryId, CircleId, ItemId, PersonId, RoleId, WorkspaceId,
};
use serde::{Deserialize, Serialize};

/// Kind tag for entities tracked by the version history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Circle,
    Role,
    Assignment,
    Item,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EntityKind::Circle => "circle",
            EntityKind::Role => "role",
            EntityKind::Assignment => "assignment",
            EntityKind::Item => "item",
        };
        write!(f, "{name}")
    }
}

/// A typed reference to a circle or a role. Proposals target one of these,
/// and circle items hang off one of these.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrgRef {
    Circle(CircleId),
    Role(RoleId),
}

impl OrgRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            OrgRef::Circle(_) => EntityKind::Circle,
            OrgRef::Role(_) => EntityKind::Role,
        }
    }

    /// Raw id string, for keying history entries across entity kinds.
    pub fn entity_id(&self) -> &str {
        match self {
            OrgRef::Circle(id) => &id.0,
            OrgRef::Role(id) => &id.0,
        }
    }
}

impl std::fmt::Display for OrgRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind(), self.entity_id())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Draft,
    Active,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircleType {
    Hierarchy,
    EmpoweredTeam,
    Guild,
    Hybrid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionModel {
    ManagerDecides,
    TeamConsensus,
    Consent,
    CoordinationOnly,
}

/// A circle: a node in the workspace's organizational hierarchy.
///
/// Parent links form a tree; the store rejects mutations that would
/// introduce a cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub id: CircleId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    /// Unique within the workspace; regenerated when a proposal renames
    /// the circle.
    pub slug: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_circle_id: Option<CircleId>,
    pub status: EntityStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circle_type: Option<CircleType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_model: Option<DecisionModel>,
    /// Monotonic, bumped on every mutation. Callers may present the
    /// version they read for fail-fast conflict detection.
    pub version: u64,
    pub created_by: PersonId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<PersonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<PersonId>,
}

impl Circle {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// A role defined within a circle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub workspace_id: WorkspaceId,
    pub circle_id: CircleId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    pub status: EntityStatus,
    pub is_hiring: bool,
    pub version: u64,
    pub created_by: PersonId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<PersonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<PersonId>,
}

impl Role {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Ended,
}

/// A person filling a role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub workspace_id: WorkspaceId,
    pub circle_id: CircleId,
    pub role_id: RoleId,
    pub person_id: PersonId,
    pub status: AssignmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    pub version: u64,
    pub created_by: PersonId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<PersonId>,
}

impl Assignment {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// Category grouping for circle items (e.g. accountabilities, domains).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleItemCategory {
    pub id: CategoryId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub order: u32,
    pub is_default: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<PersonId>,
}

/// A categorized free-text item attached to a circle or role.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleItem {
    pub id: ItemId,
    pub workspace_id: WorkspaceId,
    pub category_id: CategoryId,
    pub owner: OrgRef,
    pub content: String,
    pub order: u32,
    pub version: u64,
    pub created_by: PersonId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_by: Option<PersonId>,
}

impl CircleItem {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
