//! The org directory: flat tables of circles, roles, assignments, and
//! items, guarded by per-table locks.

use crate::slug::{ensure_unique, slugify};
use crate::{fields, ActiveFilter, OrgError};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::info;
use weave_history::{RecordChange, VersionHistoryRecorder};
use weave_types::{
    Assignment, AssignmentId, AssignmentStatus, CategoryId, Circle, CircleId, CircleItem,
    CircleItemCategory, CircleType, DecisionModel, EntitySnapshot, EntityStatus, ItemId, OrgRef,
    PersonId, ProposalEvolution, Role, RoleId, WorkspaceId,
};

/// Request to create a circle.
#[derive(Clone, Debug)]
pub struct NewCircle {
    pub workspace_id: WorkspaceId,
    pub name: String,
    pub purpose: Option<String>,
    pub parent_circle_id: Option<CircleId>,
    pub circle_type: Option<CircleType>,
    pub decision_model: Option<DecisionModel>,
    pub created_by: PersonId,
}

/// Request to create a role.
#[derive(Clone, Debug)]
pub struct NewRole {
    pub workspace_id: WorkspaceId,
    pub circle_id: CircleId,
    pub name: String,
    pub purpose: Option<String>,
    pub is_hiring: bool,
    pub created_by: PersonId,
}

/// Before/after snapshots produced by applying a proposal's evolutions.
#[derive(Clone, Debug)]
pub struct AppliedChange {
    pub before: EntitySnapshot,
    pub after: EntitySnapshot,
}

/// Arena-style store for the organizational structure of all workspaces.
///
/// Holds the version-history recorder and records every mutation it
/// performs, inside the same guarded section as the entity write.
pub struct OrgDirectory {
    circles: RwLock<HashMap<CircleId, Circle>>,
    roles: RwLock<HashMap<RoleId, Role>>,
    assignments: RwLock<HashMap<AssignmentId, Assignment>>,
    categories: RwLock<HashMap<CategoryId, CircleItemCategory>>,
    items: RwLock<HashMap<ItemId, CircleItem>>,
    history: Arc<VersionHistoryRecorder>,
}

impl OrgDirectory {
    pub fn new(history: Arc<VersionHistoryRecorder>) -> Self {
        Self {
            circles: RwLock::new(HashMap::new()),
            roles: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
            categories: RwLock::new(HashMap::new()),
            items: RwLock::new(HashMap::new()),
            history,
        }
    }

    /// Append one history entry for a mutation this store performed
    /// itself. Proposal-driven mutations are recorded at the adoption
    /// site instead, tagged with the proposal.
    fn record_change(
        &self,
        workspace_id: WorkspaceId,
        before: Option<EntitySnapshot>,
        after: Option<EntitySnapshot>,
        actor: &PersonId,
    ) -> Result<(), OrgError> {
        self.history.record(RecordChange {
            workspace_id,
            before,
            after,
            changed_by: actor.clone(),
            description: None,
            proposal_id: None,
        })?;
        Ok(())
    }

    // ============ Circles ============

    pub fn create_circle(&self, new: NewCircle) -> Result<Circle, OrgError> {
        let mut circles = self.circles.write().map_err(|_| OrgError::LockError)?;

        if let Some(parent_id) = &new.parent_circle_id {
            let parent = circles
                .get(parent_id)
                .ok_or_else(|| OrgError::EntityNotFound(parent_id.0.clone()))?;
            if parent.workspace_id != new.workspace_id {
                return Err(OrgError::WorkspaceMismatch(parent_id.0.clone()));
            }
        }

        let taken: HashSet<String> = circles
            .values()
            .filter(|c| c.workspace_id == new.workspace_id)
            .map(|c| c.slug.clone())
            .collect();
        let slug = ensure_unique(&slugify(&new.name), &taken);

        let now = chrono::Utc::now();
        let circle = Circle {
            id: CircleId::generate(),
            workspace_id: new.workspace_id,
            name: new.name,
            slug,
            purpose: new.purpose,
            parent_circle_id: new.parent_circle_id,
            status: EntityStatus::Active,
            circle_type: new.circle_type,
            decision_model: new.decision_model,
            version: 1,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            updated_by: None,
            archived_at: None,
            archived_by: None,
        };

        info!(circle = %circle.id, slug = %circle.slug, "circle created");
        circles.insert(circle.id.clone(), circle.clone());
        self.record_change(
            circle.workspace_id.clone(),
            None,
            Some(EntitySnapshot::Circle(circle.clone())),
            &circle.created_by,
        )?;
        Ok(circle)
    }

    pub fn get_circle(&self, id: &CircleId, filter: ActiveFilter) -> Result<Circle, OrgError> {
        let circles = self.circles.read().map_err(|_| OrgError::LockError)?;
        let circle = circles
            .get(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if filter == ActiveFilter::ActiveOnly && circle.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        Ok(circle.clone())
    }

    pub fn list_circles(
        &self,
        workspace_id: &WorkspaceId,
        filter: ActiveFilter,
    ) -> Result<Vec<Circle>, OrgError> {
        let circles = self.circles.read().map_err(|_| OrgError::LockError)?;
        let mut result: Vec<Circle> = circles
            .values()
            .filter(|c| c.workspace_id == *workspace_id)
            .filter(|c| filter == ActiveFilter::IncludeArchived || !c.is_archived())
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    pub fn archive_circle(&self, id: &CircleId, actor: &PersonId) -> Result<Circle, OrgError> {
        let mut circles = self.circles.write().map_err(|_| OrgError::LockError)?;
        let circle = circles
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if circle.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        let before = circle.clone();
        circle.archived_at = Some(chrono::Utc::now());
        circle.archived_by = Some(actor.clone());
        circle.updated_at = chrono::Utc::now();
        circle.updated_by = Some(actor.clone());
        circle.version += 1;
        let after = circle.clone();
        info!(circle = %id, actor = %actor, "circle archived");
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Circle(before)),
            Some(EntitySnapshot::Circle(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    pub fn restore_circle(&self, id: &CircleId, actor: &PersonId) -> Result<Circle, OrgError> {
        let mut circles = self.circles.write().map_err(|_| OrgError::LockError)?;
        let circle = circles
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        let before = circle.clone();
        circle.archived_at = None;
        circle.archived_by = None;
        circle.updated_at = chrono::Utc::now();
        circle.updated_by = Some(actor.clone());
        circle.version += 1;
        let after = circle.clone();
        info!(circle = %id, actor = %actor, "circle restored");
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Circle(before)),
            Some(EntitySnapshot::Circle(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    /// Re-parent a circle. Rejects links that would close a cycle.
    pub fn set_circle_parent(
        &self,
        id: &CircleId,
        parent: Option<CircleId>,
        actor: &PersonId,
    ) -> Result<Circle, OrgError> {
        let mut circles = self.circles.write().map_err(|_| OrgError::LockError)?;
        if let Some(parent_id) = &parent {
            if Self::would_create_cycle(&circles, id, parent_id) {
                return Err(OrgError::CycleDetected(id.0.clone()));
            }
        }
        let circle = circles
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        let before = circle.clone();
        circle.parent_circle_id = parent;
        circle.updated_at = chrono::Utc::now();
        circle.updated_by = Some(actor.clone());
        circle.version += 1;
        let after = circle.clone();
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Circle(before)),
            Some(EntitySnapshot::Circle(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    /// Walk the parent chain upward from `new_parent`; a path back to
    /// `child` means the link would close a cycle.
    fn would_create_cycle(
        circles: &HashMap<CircleId, Circle>,
        child: &CircleId,
        new_parent: &CircleId,
    ) -> bool {
        if child == new_parent {
            return true;
        }
        let mut cursor = Some(new_parent.clone());
        let mut hops = 0usize;
        while let Some(current) = cursor {
            if current == *child {
                return true;
            }
            // Bail out on chains longer than the table; the data is
            // already cyclic at that point.
            hops += 1;
            if hops > circles.len() {
                return true;
            }
            cursor = circles.get(&current).and_then(|c| c.parent_circle_id.clone());
        }
        false
    }

    // ============ Roles ============

    pub fn create_role(&self, new: NewRole) -> Result<Role, OrgError> {
        let circles = self.circles.read().map_err(|_| OrgError::LockError)?;
        let circle = circles
            .get(&new.circle_id)
            .ok_or_else(|| OrgError::EntityNotFound(new.circle_id.0.clone()))?;
        if circle.workspace_id != new.workspace_id {
            return Err(OrgError::WorkspaceMismatch(new.circle_id.0.clone()));
        }
        drop(circles);

        let now = chrono::Utc::now();
        let role = Role {
            id: RoleId::generate(),
            workspace_id: new.workspace_id,
            circle_id: new.circle_id,
            name: new.name,
            purpose: new.purpose,
            status: EntityStatus::Active,
            is_hiring: new.is_hiring,
            version: 1,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
            updated_by: None,
            archived_at: None,
            archived_by: None,
        };

        let mut roles = self.roles.write().map_err(|_| OrgError::LockError)?;
        info!(role = %role.id, circle = %role.circle_id, "role created");
        roles.insert(role.id.clone(), role.clone());
        self.record_change(
            role.workspace_id.clone(),
            None,
            Some(EntitySnapshot::Role(role.clone())),
            &role.created_by,
        )?;
        Ok(role)
    }

    pub fn get_role(&self, id: &RoleId, filter: ActiveFilter) -> Result<Role, OrgError> {
        let roles = self.roles.read().map_err(|_| OrgError::LockError)?;
        let role = roles
            .get(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if filter == ActiveFilter::ActiveOnly && role.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        Ok(role.clone())
    }

    pub fn archive_role(&self, id: &RoleId, actor: &PersonId) -> Result<Role, OrgError> {
        let mut roles = self.roles.write().map_err(|_| OrgError::LockError)?;
        let role = roles
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if role.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        let before = role.clone();
        role.archived_at = Some(chrono::Utc::now());
        role.archived_by = Some(actor.clone());
        role.updated_at = chrono::Utc::now();
        role.updated_by = Some(actor.clone());
        role.version += 1;
        let after = role.clone();
        info!(role = %id, actor = %actor, "role archived");
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Role(before)),
            Some(EntitySnapshot::Role(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    // ============ Assignments ============

    pub fn create_assignment(
        &self,
        workspace_id: WorkspaceId,
        circle_id: CircleId,
        role_id: RoleId,
        person_id: PersonId,
        actor: &PersonId,
    ) -> Result<Assignment, OrgError> {
        let role = self.get_role(&role_id, ActiveFilter::ActiveOnly)?;
        if role.workspace_id != workspace_id || role.circle_id != circle_id {
            return Err(OrgError::WorkspaceMismatch(role_id.0.clone()));
        }

        let now = chrono::Utc::now();
        let assignment = Assignment {
            id: AssignmentId::generate(),
            workspace_id,
            circle_id,
            role_id,
            person_id,
            status: AssignmentStatus::Active,
            ended_at: None,
            version: 1,
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            archived_by: None,
        };

        let mut assignments = self.assignments.write().map_err(|_| OrgError::LockError)?;
        assignments.insert(assignment.id.clone(), assignment.clone());
        self.record_change(
            assignment.workspace_id.clone(),
            None,
            Some(EntitySnapshot::Assignment(assignment.clone())),
            actor,
        )?;
        Ok(assignment)
    }

    pub fn end_assignment(
        &self,
        id: &AssignmentId,
        actor: &PersonId,
    ) -> Result<Assignment, OrgError> {
        let mut assignments = self.assignments.write().map_err(|_| OrgError::LockError)?;
        let assignment = assignments
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        let before = assignment.clone();
        assignment.status = AssignmentStatus::Ended;
        assignment.ended_at = Some(chrono::Utc::now());
        assignment.updated_at = chrono::Utc::now();
        assignment.archived_by = Some(actor.clone());
        assignment.version += 1;
        let after = assignment.clone();
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Assignment(before)),
            Some(EntitySnapshot::Assignment(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    // ============ Categories and items ============

    pub fn create_category(
        &self,
        workspace_id: WorkspaceId,
        name: String,
        is_default: bool,
    ) -> Result<CircleItemCategory, OrgError> {
        let mut categories = self.categories.write().map_err(|_| OrgError::LockError)?;
        let order = categories
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .map(|c| c.order + 1)
            .max()
            .unwrap_or(0);
        let category = CircleItemCategory {
            id: CategoryId::generate(),
            workspace_id,
            name,
            order,
            is_default,
            archived_at: None,
            archived_by: None,
        };
        categories.insert(category.id.clone(), category.clone());
        Ok(category)
    }

    /// Add a categorized free-text item under a circle or role.
    pub fn create_item(
        &self,
        workspace_id: WorkspaceId,
        category_id: CategoryId,
        owner: OrgRef,
        content: String,
        actor: &PersonId,
    ) -> Result<CircleItem, OrgError> {
        {
            let categories = self.categories.read().map_err(|_| OrgError::LockError)?;
            let category = categories
                .get(&category_id)
                .ok_or_else(|| OrgError::EntityNotFound(category_id.0.clone()))?;
            if category.workspace_id != workspace_id {
                return Err(OrgError::WorkspaceMismatch(category_id.0.clone()));
            }
        }
        self.snapshot(&owner)?;

        let mut items = self.items.write().map_err(|_| OrgError::LockError)?;
        let order = items
            .values()
            .filter(|i| i.owner == owner && i.category_id == category_id)
            .map(|i| i.order + 1)
            .max()
            .unwrap_or(0);
        let now = chrono::Utc::now();
        let item = CircleItem {
            id: ItemId::generate(),
            workspace_id,
            category_id,
            owner,
            content,
            order,
            version: 1,
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
            archived_at: None,
            archived_by: None,
        };
        items.insert(item.id.clone(), item.clone());
        self.record_change(
            item.workspace_id.clone(),
            None,
            Some(EntitySnapshot::Item(item.clone())),
            actor,
        )?;
        Ok(item)
    }

    pub fn archive_item(&self, id: &ItemId, actor: &PersonId) -> Result<CircleItem, OrgError> {
        let mut items = self.items.write().map_err(|_| OrgError::LockError)?;
        let item = items
            .get_mut(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if item.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        let before = item.clone();
        item.archived_at = Some(chrono::Utc::now());
        item.archived_by = Some(actor.clone());
        item.updated_at = chrono::Utc::now();
        item.version += 1;
        let after = item.clone();
        self.record_change(
            after.workspace_id.clone(),
            Some(EntitySnapshot::Item(before)),
            Some(EntitySnapshot::Item(after.clone())),
            actor,
        )?;
        Ok(after)
    }

    /// Items under one circle or role, ordered, honoring the filter.
    pub fn list_items(
        &self,
        owner: &OrgRef,
        filter: ActiveFilter,
    ) -> Result<Vec<CircleItem>, OrgError> {
        let items = self.items.read().map_err(|_| OrgError::LockError)?;
        let mut result: Vec<CircleItem> = items
            .values()
            .filter(|i| i.owner == *owner)
            .filter(|i| filter == ActiveFilter::IncludeArchived || !i.is_archived())
            .cloned()
            .collect();
        result.sort_by_key(|i| (i.category_id.0.clone(), i.order));
        Ok(result)
    }

    // ============ Snapshots and proposal application ============

    /// Current state of a circle or role, archived or not.
    pub fn snapshot(&self, target: &OrgRef) -> Result<EntitySnapshot, OrgError> {
        match target {
            OrgRef::Circle(id) => Ok(EntitySnapshot::Circle(
                self.get_circle(id, ActiveFilter::IncludeArchived)?,
            )),
            OrgRef::Role(id) => Ok(EntitySnapshot::Role(
                self.get_role(id, ActiveFilter::IncludeArchived)?,
            )),
        }
    }

    /// Apply a proposal's evolutions to its target entity.
    ///
    /// The whole batch applies under one write guard: the caller sees
    /// either the full change or, on any failure, no change at all.
    /// An archived or missing target is a conflict the caller surfaces as
    /// such; `expected_version` (when given) must match the stored
    /// version or the call fails fast without writing.
    pub fn apply_evolutions(
        &self,
        target: &OrgRef,
        evolutions: &[ProposalEvolution],
        actor: &PersonId,
        expected_version: Option<u64>,
    ) -> Result<AppliedChange, OrgError> {
        match target {
            OrgRef::Circle(id) => self.apply_to_circle(id, evolutions, actor, expected_version),
            OrgRef::Role(id) => self.apply_to_role(id, evolutions, actor, expected_version),
        }
    }

    fn apply_to_circle(
        &self,
        id: &CircleId,
        evolutions: &[ProposalEvolution],
        actor: &PersonId,
        expected_version: Option<u64>,
    ) -> Result<AppliedChange, OrgError> {
        let mut circles = self.circles.write().map_err(|_| OrgError::LockError)?;
        let current = circles
            .get(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if current.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(OrgError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        let before = current.clone();
        let mut updated = current.clone();
        let mut name_changed = false;
        for evolution in evolutions {
            name_changed |= fields::apply_circle_field(
                &mut updated,
                &evolution.field_path,
                evolution.after_value.as_ref(),
                evolution.change_kind,
            )?;
        }

        if let Some(parent_id) = &updated.parent_circle_id {
            if updated.parent_circle_id != before.parent_circle_id
                && Self::would_create_cycle(&circles, id, parent_id)
            {
                return Err(OrgError::CycleDetected(id.0.clone()));
            }
        }

        if name_changed {
            let taken: HashSet<String> = circles
                .values()
                .filter(|c| c.workspace_id == updated.workspace_id && c.id != updated.id)
                .map(|c| c.slug.clone())
                .collect();
            updated.slug = ensure_unique(&slugify(&updated.name), &taken);
        }

        updated.version += 1;
        updated.updated_at = chrono::Utc::now();
        updated.updated_by = Some(actor.clone());

        circles.insert(id.clone(), updated.clone());
        Ok(AppliedChange {
            before: EntitySnapshot::Circle(before),
            after: EntitySnapshot::Circle(updated),
        })
    }

    fn apply_to_role(
        &self,
        id: &RoleId,
        evolutions: &[ProposalEvolution],
        actor: &PersonId,
        expected_version: Option<u64>,
    ) -> Result<AppliedChange, OrgError> {
        let mut roles = self.roles.write().map_err(|_| OrgError::LockError)?;
        let current = roles
            .get(id)
            .ok_or_else(|| OrgError::EntityNotFound(id.0.clone()))?;
        if current.is_archived() {
            return Err(OrgError::EntityArchived(id.0.clone()));
        }
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(OrgError::VersionConflict {
                    expected,
                    actual: current.version,
                });
            }
        }

        let before = current.clone();
        let mut updated = current.clone();
        for evolution in evolutions {
            fields::apply_role_field(
                &mut updated,
                &evolution.field_path,
                evolution.after_value.as_ref(),
                evolution.change_kind,
            )?;
        }

        updated.version += 1;
        updated.updated_at = chrono::Utc::now();
        updated.updated_by = Some(actor.clone());

        roles.insert(id.clone(), updated.clone());
        Ok(AppliedChange {
            before: EntitySnapshot::Role(before),
            after: EntitySnapshot::Role(updated),
        })
    }
}
