//! Weave History - the append-only version history recorder
//!
//! Every mutation to a tracked entity lands here as one write-once
//! [`VersionHistoryEntry`] holding full before/after snapshots. Entries
//! are never edited or deleted, and a proposal may account for at most
//! one entry. Replaying an entity's `after` snapshots oldest-first
//! reconstructs every state it has ever been in.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;
use weave_types::{
    ChangeOp, EntityKind, EntitySnapshot, HistoryEntryId, PersonId, ProposalId,
    VersionHistoryEntry, WorkspaceId,
};

/// History recorder errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History entry not found: {0}")]
    EntryNotFound(String),

    #[error("Proposal {0} already has a history entry")]
    DuplicateProposalEntry(String),

    #[error("Entry has no snapshot on either side")]
    EmptyEntry,

    #[error("Lock error")]
    LockError,
}

/// What the caller hands the recorder for one mutation.
#[derive(Clone, Debug)]
pub struct RecordChange {
    pub workspace_id: WorkspaceId,
    pub before: Option<EntitySnapshot>,
    pub after: Option<EntitySnapshot>,
    pub changed_by: PersonId,
    pub description: Option<String>,
    pub proposal_id: Option<ProposalId>,
}

/// Append-only store of version history entries.
///
/// Entries live in insertion order; secondary indexes by entity and by
/// proposal keep the timeline queries cheap. Insertion order is also
/// chronological order because every write stamps `changed_at` under the
/// same write guard.
pub struct VersionHistoryRecorder {
    inner: RwLock<HistoryTables>,
}

#[derive(Default)]
struct HistoryTables {
    entries: Vec<VersionHistoryEntry>,
    by_entity: HashMap<(EntityKind, String), Vec<usize>>,
    by_proposal: HashMap<ProposalId, usize>,
}

impl VersionHistoryRecorder {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HistoryTables::default()),
        }
    }

    /// Append one entry. The change op is derived from the snapshots, not
    /// caller-asserted. Rejects a second entry for the same proposal.
    pub fn record(&self, change: RecordChange) -> Result<VersionHistoryEntry, HistoryError> {
        let snapshot = change
            .after
            .as_ref()
            .or(change.before.as_ref())
            .ok_or(HistoryError::EmptyEntry)?;
        let entity_kind = snapshot.kind();
        let entity_id = snapshot.entity_id().to_string();

        let mut tables = self.inner.write().map_err(|_| HistoryError::LockError)?;
        if let Some(proposal_id) = &change.proposal_id {
            if tables.by_proposal.contains_key(proposal_id) {
                return Err(HistoryError::DuplicateProposalEntry(proposal_id.0.clone()));
            }
        }

        let entry = VersionHistoryEntry {
            id: HistoryEntryId::generate(),
            workspace_id: change.workspace_id,
            entity_kind,
            entity_id: entity_id.clone(),
            change: VersionHistoryEntry::derive_op(change.before.as_ref(), change.after.as_ref()),
            before: change.before,
            after: change.after,
            changed_by: change.changed_by,
            changed_at: chrono::Utc::now(),
            description: change.description,
            proposal_id: change.proposal_id,
        };

        let index = tables.entries.len();
        tables
            .by_entity
            .entry((entity_kind, entity_id))
            .or_default()
            .push(index);
        if let Some(proposal_id) = &entry.proposal_id {
            tables.by_proposal.insert(proposal_id.clone(), index);
        }
        info!(
            entry = %entry.id,
            entity = %entry.entity_kind,
            entity_id = %entry.entity_id,
            op = ?entry.change,
            "history entry recorded"
        );
        tables.entries.push(entry.clone());
        Ok(entry)
    }

    pub fn get(&self, id: &HistoryEntryId) -> Result<VersionHistoryEntry, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        tables
            .entries
            .iter()
            .find(|e| e.id == *id)
            .cloned()
            .ok_or_else(|| HistoryError::EntryNotFound(id.0.clone()))
    }

    /// All entries for one entity, oldest first.
    pub fn history_for(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<VersionHistoryEntry>, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        Ok(tables
            .by_entity
            .get(&(kind, entity_id.to_string()))
            .map(|indexes| indexes.iter().map(|i| tables.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    /// The entry a proposal produced on adoption, if it has been adopted.
    pub fn history_for_proposal(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Option<VersionHistoryEntry>, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        Ok(tables
            .by_proposal
            .get(proposal_id)
            .map(|i| tables.entries[*i].clone()))
    }

    /// Workspace-wide timeline, oldest first, optionally windowed by
    /// changed-at.
    pub fn timeline(
        &self,
        workspace_id: &WorkspaceId,
        since: Option<chrono::DateTime<chrono::Utc>>,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<VersionHistoryEntry>, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.workspace_id == *workspace_id)
            .filter(|e| since.map_or(true, |s| e.changed_at >= s))
            .filter(|e| until.map_or(true, |u| e.changed_at <= u))
            .cloned()
            .collect())
    }

    /// Everything one person changed in a workspace, oldest first.
    pub fn changes_by_person(
        &self,
        workspace_id: &WorkspaceId,
        person: &PersonId,
    ) -> Result<Vec<VersionHistoryEntry>, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        Ok(tables
            .entries
            .iter()
            .filter(|e| e.workspace_id == *workspace_id && e.changed_by == *person)
            .cloned()
            .collect())
    }

    /// Replay an entity's history and return every state it has held, in
    /// order. The first element is the create snapshot.
    pub fn replay(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<EntitySnapshot>, HistoryError> {
        Ok(self
            .history_for(kind, entity_id)?
            .into_iter()
            .filter_map(|e| e.after)
            .collect())
    }

    /// The entity's state as of the given instant, if it existed yet.
    pub fn state_at(
        &self,
        kind: EntityKind,
        entity_id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<EntitySnapshot>, HistoryError> {
        Ok(self
            .history_for(kind, entity_id)?
            .into_iter()
            .filter(|e| e.changed_at <= at)
            .filter_map(|e| e.after)
            .last())
    }

    pub fn len(&self) -> Result<usize, HistoryError> {
        let tables = self.inner.read().map_err(|_| HistoryError::LockError)?;
        Ok(tables.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, HistoryError> {
        Ok(self.len()? == 0)
    }
}

impl Default for VersionHistoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of archive entries minus restore entries; 1 means the latest
/// entry left the entity archived.
pub fn net_archived(entries: &[VersionHistoryEntry]) -> i64 {
    entries.iter().fold(0i64, |acc, e| match e.change {
        ChangeOp::Archive => acc + 1,
        ChangeOp::Restore => acc - 1,
        _ => acc,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use weave_types::{Circle, CircleId, EntityStatus};

    fn circle_snapshot(name: &str, version: u64, archived: bool) -> EntitySnapshot {
        let now = chrono::Utc::now();
        EntitySnapshot::Circle(Circle {
            id: CircleId::new("c1"),
            workspace_id: WorkspaceId::new("w1"),
            name: name.to_string(),
            slug: name.to_lowercase(),
            purpose: None,
            parent_circle_id: None,
            status: EntityStatus::Active,
            circle_type: None,
            decision_model: None,
            version,
            created_by: PersonId::new("p1"),
            created_at: now,
            updated_at: now,
            updated_by: None,
            archived_at: archived.then(chrono::Utc::now),
            archived_by: None,
        })
    }

    fn record(
        recorder: &VersionHistoryRecorder,
        before: Option<EntitySnapshot>,
        after: Option<EntitySnapshot>,
        proposal_id: Option<ProposalId>,
    ) -> VersionHistoryEntry {
        recorder
            .record(RecordChange {
                workspace_id: WorkspaceId::new("w1"),
                before,
                after,
                changed_by: PersonId::new("p1"),
                description: None,
                proposal_id,
            })
            .unwrap()
    }

    #[test]
    fn history_is_ordered_oldest_first() {
        let recorder = VersionHistoryRecorder::new();
        let v1 = circle_snapshot("Ops", 1, false);
        let v2 = circle_snapshot("Operations", 2, false);
        let v3 = circle_snapshot("Operations", 3, true);

        record(&recorder, None, Some(v1.clone()), None);
        record(&recorder, Some(v1.clone()), Some(v2.clone()), None);
        record(&recorder, Some(v2), Some(v3), None);

        let entries = recorder.history_for(EntityKind::Circle, "c1").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].change, ChangeOp::Create);
        assert_eq!(entries[1].change, ChangeOp::Update);
        assert_eq!(entries[2].change, ChangeOp::Archive);
    }

    #[test]
    fn one_entry_per_proposal() {
        let recorder = VersionHistoryRecorder::new();
        let proposal = ProposalId::generate();
        let v1 = circle_snapshot("Ops", 1, false);
        let v2 = circle_snapshot("Operations", 2, false);

        record(&recorder, None, Some(v1.clone()), None);
        record(&recorder, Some(v1.clone()), Some(v2.clone()), Some(proposal.clone()));

        let err = recorder
            .record(RecordChange {
                workspace_id: WorkspaceId::new("w1"),
                before: Some(v2.clone()),
                after: Some(v2),
                changed_by: PersonId::new("p1"),
                description: None,
                proposal_id: Some(proposal.clone()),
            })
            .unwrap_err();
        assert!(matches!(err, HistoryError::DuplicateProposalEntry(_)));

        // The failed write left nothing behind.
        assert_eq!(recorder.len().unwrap(), 2);
        let found = recorder.history_for_proposal(&proposal).unwrap().unwrap();
        assert_eq!(found.after.unwrap().entity_id(), "c1");
    }

    #[test]
    fn snapshotless_record_rejected() {
        let recorder = VersionHistoryRecorder::new();
        let err = recorder
            .record(RecordChange {
                workspace_id: WorkspaceId::new("w1"),
                before: None,
                after: None,
                changed_by: PersonId::new("p1"),
                description: None,
                proposal_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, HistoryError::EmptyEntry));
    }

    #[test]
    fn replay_reconstructs_every_state() {
        let recorder = VersionHistoryRecorder::new();
        let v1 = circle_snapshot("Ops", 1, false);
        let v2 = circle_snapshot("Operations", 2, false);

        record(&recorder, None, Some(v1.clone()), None);
        record(&recorder, Some(v1), Some(v2), None);

        let states = recorder.replay(EntityKind::Circle, "c1").unwrap();
        let names: Vec<&str> = states
            .iter()
            .map(|s| match s {
                EntitySnapshot::Circle(c) => c.name.as_str(),
                other => panic!("expected circle snapshot, got {other:?}"),
            })
            .collect();
        assert_eq!(names, ["Ops", "Operations"]);
    }

    #[test]
    fn timeline_windows_by_changed_at() {
        let recorder = VersionHistoryRecorder::new();
        let v1 = circle_snapshot("Ops", 1, false);
        record(&recorder, None, Some(v1), None);

        let workspace = WorkspaceId::new("w1");
        let all = recorder.timeline(&workspace, None, None).unwrap();
        assert_eq!(all.len(), 1);

        let future = chrono::Utc::now() + chrono::Duration::hours(1);
        assert!(recorder.timeline(&workspace, Some(future), None).unwrap().is_empty());
        assert!(recorder.timeline(&workspace, None, Some(future)).unwrap().len() == 1);
    }

    proptest! {
        // Any interleaving of updates and archive flips keeps the derived
        // op sequence consistent with the archived state it replays to.
        #[test]
        fn archive_balance_matches_final_state(flips in proptest::collection::vec(any::<bool>(), 1..12)) {
            let recorder = VersionHistoryRecorder::new();
            let mut current = circle_snapshot("Ops", 1, false);
            record(&recorder, None, Some(current.clone()), None);

            let mut version = 1u64;
            for archived in flips {
                version += 1;
                let next = circle_snapshot("Ops", version, archived);
                record(&recorder, Some(current), Some(next.clone()), None);
                current = next;
            }

            let entries = recorder.history_for(EntityKind::Circle, "c1").unwrap();
            let net = net_archived(&entries);
            prop_assert_eq!(net > 0, current.is_archived());
            prop_assert!((0..=1).contains(&net));
        }
    }
}
