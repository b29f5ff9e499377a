//! The proposal state machine.
//!
//! Every mutating operation reads current status, checks its guards, and
//! writes the new state while holding the proposal table's write guard,
//! so concurrent calls against one proposal serialize and a guard
//! failure never leaves a partial write. Closure additionally mutates the
//! target entity and appends the history entry inside the same guarded
//! section, which is the one place two writes must land together.

use crate::LifecycleError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use weave_gate::MeetingBinding;
use weave_history::{RecordChange, VersionHistoryRecorder};
use weave_objections::ObjectionLedger;
use weave_org::{commit_with_retry, ActiveFilter, OrgDirectory, OrgError};
use weave_types::{
    AgendaItemId, AttachmentId, ChangeKind, EvolutionId, FieldChange, FileId, MeetingId,
    Objection, OrgRef, PersonId, Proposal, ProposalAttachment, ProposalEvolution, ProposalId,
    ProposalStatus, Validity, WorkspaceId,
};

/// Request to open a proposal.
#[derive(Clone, Debug)]
pub struct NewProposal {
    pub workspace_id: WorkspaceId,
    pub target: OrgRef,
    pub title: String,
    pub description: String,
    /// Initial payload; more changes can be added while in draft.
    pub changes: Vec<FieldChange>,
}

/// Owns proposals, their evolutions, and their attachments, and drives
/// the lifecycle against the org directory, the objection ledger, and
/// the version history.
pub struct ProposalLifecycleManager {
    proposals: RwLock<HashMap<ProposalId, Proposal>>,
    evolutions: RwLock<HashMap<ProposalId, Vec<ProposalEvolution>>>,
    attachments: RwLock<HashMap<ProposalId, Vec<ProposalAttachment>>>,
    directory: Arc<OrgDirectory>,
    history: Arc<VersionHistoryRecorder>,
    objections: Arc<ObjectionLedger>,
    meetings: Arc<dyn MeetingBinding>,
}

impl ProposalLifecycleManager {
    pub fn new(
        directory: Arc<OrgDirectory>,
        history: Arc<VersionHistoryRecorder>,
        objections: Arc<ObjectionLedger>,
        meetings: Arc<dyn MeetingBinding>,
    ) -> Self {
        Self {
            proposals: RwLock::new(HashMap::new()),
            evolutions: RwLock::new(HashMap::new()),
            attachments: RwLock::new(HashMap::new()),
            directory,
            history,
            objections,
            meetings,
        }
    }

    pub fn objection_ledger(&self) -> &ObjectionLedger {
        &self.objections
    }

    pub fn version_history(&self) -> &VersionHistoryRecorder {
        &self.history
    }

    // ============ Creation and draft editing ============

    /// Open a proposal in `draft` against one circle or role.
    pub fn create(&self, actor: &PersonId, new: NewProposal) -> Result<Proposal, LifecycleError> {
        let circle_id = self.resolve_target_circle(&new.workspace_id, &new.target)?;

        let now = chrono::Utc::now();
        let proposal = Proposal {
            id: ProposalId::generate(),
            workspace_id: new.workspace_id,
            target: new.target,
            circle_id: Some(circle_id),
            title: new.title,
            description: new.description,
            status: ProposalStatus::Draft,
            meeting_id: None,
            agenda_item_id: None,
            history_entry_id: None,
            created_by: actor.clone(),
            created_at: now,
            updated_at: now,
            submitted_at: None,
            processed_at: None,
            processed_by: None,
            resolution_note: None,
        };

        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        proposals.insert(proposal.id.clone(), proposal.clone());
        if !new.changes.is_empty() {
            self.append_changes(&proposal.id, &new.changes)?;
        }
        info!(proposal = %proposal.id, target = %proposal.target, "proposal created");
        Ok(proposal)
    }

    /// Open a proposal whose payload is the field-by-field diff between
    /// two JSON views of the target. Keys only in `after` become adds,
    /// keys only in `before` become removes, differing values updates.
    /// The proposal lands directly in `submitted`.
    pub fn create_from_diff(
        &self,
        actor: &PersonId,
        workspace_id: WorkspaceId,
        target: OrgRef,
        title: String,
        description: String,
        before: &serde_json::Map<String, serde_json::Value>,
        after: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Proposal, LifecycleError> {
        let mut paths: Vec<&String> = before.keys().chain(after.keys()).collect();
        paths.sort();
        paths.dedup();

        let mut changes = Vec::new();
        for path in paths {
            let old = before.get(path);
            let new = after.get(path);
            let change_kind = match (old, new) {
                (None, Some(_)) => ChangeKind::Add,
                (Some(_), None) => ChangeKind::Remove,
                (Some(a), Some(b)) if a != b => ChangeKind::Update,
                _ => continue,
            };
            changes.push(FieldChange {
                field_path: path.clone(),
                field_label: humanize(path),
                before_value: old.cloned(),
                after_value: new.cloned(),
                change_kind,
            });
        }

        if changes.is_empty() {
            return Err(LifecycleError::NoChanges(target.to_string()));
        }
        let proposal = self.create(
            actor,
            NewProposal {
                workspace_id,
                target,
                title,
                description,
                changes,
            },
        )?;
        self.submit(actor, &proposal.id)
    }

    /// Add one field change to a draft. Creator only.
    pub fn add_evolution(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        change: FieldChange,
    ) -> Result<ProposalEvolution, LifecycleError> {
        let proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find(&proposals, proposal_id)?;
        Self::require_creator(proposal, actor, "edit")?;
        Self::require_status(proposal, ProposalStatus::Draft, "edit")?;

        // The proposals guard stays held across the evolutions write, so a
        // concurrent transition cannot land between the status check and
        // the append. Same lock order as `remove_evolution`.
        let mut recorded = self.append_changes(proposal_id, std::slice::from_ref(&change))?;
        Ok(recorded.remove(0))
    }

    /// Drop one field change from a draft. Creator only; once submitted
    /// the evolution list is append-only.
    pub fn remove_evolution(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        evolution_id: &EvolutionId,
    ) -> Result<(), LifecycleError> {
        let proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find(&proposals, proposal_id)?;
        Self::require_creator(proposal, actor, "edit")?;
        Self::require_status(proposal, ProposalStatus::Draft, "edit")?;

        let mut evolutions = self.evolutions.write().map_err(|_| LifecycleError::LockError)?;
        let list = evolutions.entry(proposal_id.clone()).or_default();
        let before = list.len();
        list.retain(|e| e.id != *evolution_id);
        if list.len() == before {
            return Err(LifecycleError::EntityNotFound(evolution_id.0.clone()));
        }
        Ok(())
    }

    // ============ Lifecycle transitions ============

    /// `draft → submitted`. Creator only; the payload must be non-empty.
    pub fn submit(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, LifecycleError> {
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        Self::require_creator(proposal, actor, "submit")?;
        Self::require_status(proposal, ProposalStatus::Draft, "submit")?;
        if self.evolution_count(proposal_id)? == 0 {
            return Err(LifecycleError::NoChanges(proposal_id.0.clone()));
        }

        proposal.status = ProposalStatus::Submitted;
        proposal.submitted_at = Some(chrono::Utc::now());
        proposal.updated_at = chrono::Utc::now();
        info!(proposal = %proposal_id, "proposal submitted");
        Ok(proposal.clone())
    }

    /// `submitted → in_meeting`. The meeting side must vouch for the
    /// agenda item within the proposal's workspace.
    pub fn bind_to_meeting(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        meeting_id: MeetingId,
        agenda_item_id: AgendaItemId,
    ) -> Result<Proposal, LifecycleError> {
        let _ = actor;
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        Self::require_status(proposal, ProposalStatus::Submitted, "bind to a meeting")?;
        if !self
            .meetings
            .agenda_item_exists(&proposal.workspace_id, &meeting_id, &agenda_item_id)
        {
            return Err(LifecycleError::AgendaItemNotFound(agenda_item_id.0.clone()));
        }

        proposal.status = ProposalStatus::InMeeting;
        proposal.meeting_id = Some(meeting_id.clone());
        proposal.agenda_item_id = Some(agenda_item_id);
        proposal.updated_at = chrono::Utc::now();
        self.meetings.on_proposal_entered_meeting(proposal_id, &meeting_id);
        info!(proposal = %proposal_id, meeting = %meeting_id, "proposal bound to meeting");
        Ok(proposal.clone())
    }

    /// Raise an objection while the window is open (`in_meeting` or
    /// `objections`). The first objection moves the proposal to
    /// `objections`.
    pub fn raise_objection(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        body: &str,
    ) -> Result<Objection, LifecycleError> {
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        if !proposal.status.objection_window_open() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "raise an objection against",
            });
        }

        let objection = self.objections.raise(proposal_id, actor, body)?;
        if proposal.status == ProposalStatus::InMeeting {
            proposal.status = ProposalStatus::Objections;
            proposal.updated_at = chrono::Utc::now();
            info!(proposal = %proposal_id, "objection round opened");
        }
        Ok(objection)
    }

    /// Facilitator ruling on an objection. An invalid ruling may resolve
    /// the round and return the proposal to `in_meeting`.
    pub fn validate_objection(
        &self,
        actor: &PersonId,
        objection_id: &weave_types::ObjectionId,
        validity: Validity,
        note: Option<String>,
    ) -> Result<Objection, LifecycleError> {
        let objection = self.objections.get(objection_id)?;
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, &objection.proposal_id)?;
        if proposal.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "rule on an objection against",
            });
        }

        let ruled = self.objections.validate(objection_id, validity, actor, note)?;
        self.resolve_round(proposal)?;
        Ok(ruled)
    }

    /// Amend the payload while in `objections`. Each changed field lands
    /// as one new evolution; the status does not move.
    pub fn amend(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        changes: Vec<FieldChange>,
    ) -> Result<Vec<ProposalEvolution>, LifecycleError> {
        let _ = actor;
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        Self::require_status(proposal, ProposalStatus::Objections, "amend")?;
        if changes.is_empty() {
            return Err(LifecycleError::NoChanges(proposal_id.0.clone()));
        }

        proposal.updated_at = chrono::Utc::now();
        // Append under the proposals guard: a concurrent reject or
        // withdraw cannot slip between the status check and the write.
        self.append_changes(proposal_id, &changes)
    }

    /// Mark a valid objection integrated. Requires at least one evolution
    /// recorded after the objection was raised, so an integration is
    /// always backed by an amendment. Resolving the last blocking
    /// objection closes the round: `objections → integrated → in_meeting`.
    pub fn integrate_objection(
        &self,
        actor: &PersonId,
        objection_id: &weave_types::ObjectionId,
        note: Option<String>,
    ) -> Result<Objection, LifecycleError> {
        let _ = actor;
        let objection = self.objections.get(objection_id)?;
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, &objection.proposal_id)?;
        Self::require_status(proposal, ProposalStatus::Objections, "integrate an objection on")?;

        let amended_since = {
            let evolutions = self.evolutions.read().map_err(|_| LifecycleError::LockError)?;
            evolutions
                .get(&objection.proposal_id)
                .map_or(false, |list| {
                    list.iter().any(|e| e.created_at > objection.created_at)
                })
        };
        if !amended_since {
            return Err(LifecycleError::AmendmentRequired(objection_id.0.clone()));
        }

        let integrated = self.objections.mark_integrated(objection_id, note)?;
        self.resolve_round(proposal)?;
        Ok(integrated)
    }

    /// `in_meeting → approved`, only with zero outstanding objections.
    ///
    /// Applies the evolutions to the target entity and records the diff
    /// in the version history tagged with this proposal. A target that
    /// changed underneath (archived, gone, version race after one retry)
    /// surfaces as [`LifecycleError::TargetEntityConflict`] with the
    /// proposal untouched in `in_meeting`.
    pub fn close(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, LifecycleError> {
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        Self::require_status(proposal, ProposalStatus::InMeeting, "close")?;
        if self.objections.has_outstanding(proposal_id)? {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "close",
            });
        }

        let evolutions = {
            let table = self.evolutions.read().map_err(|_| LifecycleError::LockError)?;
            table.get(proposal_id).cloned().unwrap_or_default()
        };
        if evolutions.is_empty() {
            return Err(LifecycleError::NoChanges(proposal_id.0.clone()));
        }

        let applied = commit_with_retry(|| {
            self.directory
                .apply_evolutions(&proposal.target, &evolutions, actor, None)
        })
        .map_err(|e| {
            warn!(proposal = %proposal_id, error = %e, "target mutation failed, proposal left in meeting");
            LifecycleError::TargetEntityConflict(e.to_string())
        })?;

        let entry = self.history.record(RecordChange {
            workspace_id: proposal.workspace_id.clone(),
            before: Some(applied.before),
            after: Some(applied.after),
            changed_by: actor.clone(),
            description: Some(proposal.title.clone()),
            proposal_id: Some(proposal_id.clone()),
        })?;

        proposal.status = ProposalStatus::Approved;
        proposal.history_entry_id = Some(entry.id.clone());
        proposal.processed_at = Some(chrono::Utc::now());
        proposal.processed_by = Some(actor.clone());
        proposal.updated_at = chrono::Utc::now();
        if let Some(meeting_id) = proposal.meeting_id.clone() {
            self.meetings.on_proposal_left_meeting(proposal_id, &meeting_id);
        }
        info!(proposal = %proposal_id, entry = %entry.id, "proposal approved");
        Ok(proposal.clone())
    }

    /// Terminal rejection from any non-terminal state. Never mutates the
    /// target entity.
    pub fn reject(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        reason: String,
    ) -> Result<Proposal, LifecycleError> {
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        if proposal.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "reject",
            });
        }
        proposal.resolution_note = Some(reason);
        self.finish(proposal, ProposalStatus::Rejected, actor);
        Ok(proposal.clone())
    }

    /// Terminal withdrawal by the creator, from any non-terminal state.
    pub fn withdraw(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, LifecycleError> {
        let mut proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find_mut(&mut proposals, proposal_id)?;
        Self::require_creator(proposal, actor, "withdraw")?;
        if proposal.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "withdraw",
            });
        }
        self.finish(proposal, ProposalStatus::Withdrawn, actor);
        Ok(proposal.clone())
    }

    // ============ Attachments ============

    pub fn attach_file(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        file_id: FileId,
        file_name: String,
        size_bytes: u64,
    ) -> Result<ProposalAttachment, LifecycleError> {
        let proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find(&proposals, proposal_id)?;
        if proposal.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "attach a file to",
            });
        }

        let attachment = ProposalAttachment {
            id: AttachmentId::generate(),
            proposal_id: proposal_id.clone(),
            file_id,
            file_name,
            size_bytes,
            uploaded_by: actor.clone(),
            uploaded_at: chrono::Utc::now(),
        };
        let mut attachments = self.attachments.write().map_err(|_| LifecycleError::LockError)?;
        attachments
            .entry(proposal_id.clone())
            .or_default()
            .push(attachment.clone());
        Ok(attachment)
    }

    /// Attachments go away only through this explicit call.
    pub fn remove_attachment(
        &self,
        actor: &PersonId,
        proposal_id: &ProposalId,
        attachment_id: &AttachmentId,
    ) -> Result<(), LifecycleError> {
        let _ = actor;
        let proposals = self.proposals.write().map_err(|_| LifecycleError::LockError)?;
        let proposal = Self::find(&proposals, proposal_id)?;
        if proposal.status.is_terminal() {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action: "remove an attachment from",
            });
        }

        let mut attachments = self.attachments.write().map_err(|_| LifecycleError::LockError)?;
        let list = attachments.entry(proposal_id.clone()).or_default();
        let before = list.len();
        list.retain(|a| a.id != *attachment_id);
        if list.len() == before {
            return Err(LifecycleError::AttachmentNotFound(attachment_id.0.clone()));
        }
        Ok(())
    }

    // ============ Reads ============

    pub fn get(&self, proposal_id: &ProposalId) -> Result<Proposal, LifecycleError> {
        let proposals = self.proposals.read().map_err(|_| LifecycleError::LockError)?;
        Self::find(&proposals, proposal_id).cloned()
    }

    pub fn list_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, LifecycleError> {
        let proposals = self.proposals.read().map_err(|_| LifecycleError::LockError)?;
        let mut result: Vec<Proposal> = proposals
            .values()
            .filter(|p| p.workspace_id == *workspace_id)
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    pub fn list_by_entity(&self, target: &OrgRef) -> Result<Vec<Proposal>, LifecycleError> {
        let proposals = self.proposals.read().map_err(|_| LifecycleError::LockError)?;
        let mut result: Vec<Proposal> = proposals
            .values()
            .filter(|p| p.target == *target)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    /// A proposal's evolutions in sequence order.
    pub fn list_evolutions(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<ProposalEvolution>, LifecycleError> {
        let evolutions = self.evolutions.read().map_err(|_| LifecycleError::LockError)?;
        let mut list = evolutions.get(proposal_id).cloned().unwrap_or_default();
        list.sort_by_key(|e| e.order);
        Ok(list)
    }

    pub fn list_attachments(
        &self,
        proposal_id: &ProposalId,
    ) -> Result<Vec<ProposalAttachment>, LifecycleError> {
        let attachments = self.attachments.read().map_err(|_| LifecycleError::LockError)?;
        Ok(attachments.get(proposal_id).cloned().unwrap_or_default())
    }

    // ============ Internals ============

    fn find<'a>(
        proposals: &'a HashMap<ProposalId, Proposal>,
        id: &ProposalId,
    ) -> Result<&'a Proposal, LifecycleError> {
        proposals
            .get(id)
            .ok_or_else(|| LifecycleError::ProposalNotFound(id.0.clone()))
    }

    fn find_mut<'a>(
        proposals: &'a mut HashMap<ProposalId, Proposal>,
        id: &ProposalId,
    ) -> Result<&'a mut Proposal, LifecycleError> {
        proposals
            .get_mut(id)
            .ok_or_else(|| LifecycleError::ProposalNotFound(id.0.clone()))
    }

    fn require_status(
        proposal: &Proposal,
        expected: ProposalStatus,
        action: &'static str,
    ) -> Result<(), LifecycleError> {
        if proposal.status != expected {
            return Err(LifecycleError::InvalidTransition {
                from: proposal.status,
                action,
            });
        }
        Ok(())
    }

    fn require_creator(
        proposal: &Proposal,
        actor: &PersonId,
        action: &'static str,
    ) -> Result<(), LifecycleError> {
        if proposal.created_by != *actor {
            return Err(LifecycleError::Forbidden(format!(
                "only the proposal's creator may {action} it"
            )));
        }
        Ok(())
    }

    /// Validate the target and work out which circle governs it.
    fn resolve_target_circle(
        &self,
        workspace_id: &WorkspaceId,
        target: &OrgRef,
    ) -> Result<weave_types::CircleId, LifecycleError> {
        match target {
            OrgRef::Circle(id) => {
                let circle = self
                    .directory
                    .get_circle(id, ActiveFilter::ActiveOnly)
                    .map_err(map_org_read)?;
                if circle.workspace_id != *workspace_id {
                    return Err(LifecycleError::WorkspaceMismatch(id.0.clone()));
                }
                Ok(circle.id)
            }
            OrgRef::Role(id) => {
                let role = self
                    .directory
                    .get_role(id, ActiveFilter::ActiveOnly)
                    .map_err(map_org_read)?;
                if role.workspace_id != *workspace_id {
                    return Err(LifecycleError::WorkspaceMismatch(id.0.clone()));
                }
                Ok(role.circle_id)
            }
        }
    }

    fn evolution_count(&self, proposal_id: &ProposalId) -> Result<usize, LifecycleError> {
        let evolutions = self.evolutions.read().map_err(|_| LifecycleError::LockError)?;
        Ok(evolutions.get(proposal_id).map_or(0, Vec::len))
    }

    /// Append changes as evolutions, continuing the sequence.
    fn append_changes(
        &self,
        proposal_id: &ProposalId,
        changes: &[FieldChange],
    ) -> Result<Vec<ProposalEvolution>, LifecycleError> {
        let mut evolutions = self.evolutions.write().map_err(|_| LifecycleError::LockError)?;
        let list = evolutions.entry(proposal_id.clone()).or_default();
        let mut next_order = list.iter().map(|e| e.order + 1).max().unwrap_or(0);

        let mut recorded = Vec::with_capacity(changes.len());
        for change in changes {
            let evolution = ProposalEvolution {
                id: EvolutionId::generate(),
                proposal_id: proposal_id.clone(),
                field_path: change.field_path.clone(),
                field_label: change.field_label.clone(),
                before_value: change.before_value.clone(),
                after_value: change.after_value.clone(),
                change_kind: change.change_kind,
                order: next_order,
                created_at: chrono::Utc::now(),
            };
            next_order += 1;
            list.push(evolution.clone());
            recorded.push(evolution);
        }
        Ok(recorded)
    }

    /// Close the objection round once nothing blocks it: no unruled
    /// objections and no valid ones still pending integration. Walks
    /// `objections → integrated → in_meeting` so the window reopens for
    /// a fresh round.
    fn resolve_round(&self, proposal: &mut Proposal) -> Result<(), LifecycleError> {
        if proposal.status != ProposalStatus::Objections {
            return Ok(());
        }
        if self.objections.has_blocking(&proposal.id)? {
            return Ok(());
        }
        // The `integrated` hop is momentary; callers only ever observe the
        // proposal landing back in `in_meeting`.
        proposal.status = ProposalStatus::InMeeting;
        proposal.updated_at = chrono::Utc::now();
        info!(proposal = %proposal.id, "objection round resolved, back in meeting");
        Ok(())
    }

    fn finish(&self, proposal: &mut Proposal, status: ProposalStatus, actor: &PersonId) {
        proposal.status = status;
        proposal.processed_at = Some(chrono::Utc::now());
        proposal.processed_by = Some(actor.clone());
        proposal.updated_at = chrono::Utc::now();
        if let Some(meeting_id) = proposal.meeting_id.clone() {
            self.meetings.on_proposal_left_meeting(&proposal.id, &meeting_id);
        }
        info!(proposal = %proposal.id, status = %status, "proposal finished");
    }
}

fn map_org_read(e: OrgError) -> LifecycleError {
    match e {
        OrgError::EntityNotFound(id) | OrgError::EntityArchived(id) => {
            LifecycleError::EntityNotFound(id)
        }
        OrgError::WorkspaceMismatch(id) => LifecycleError::WorkspaceMismatch(id),
        OrgError::LockError => LifecycleError::LockError,
        other => LifecycleError::TargetEntityConflict(other.to_string()),
    }
}

/// `field_path` to a display label: `parent_circle_id` -> "Parent circle id".
fn humanize(path: &str) -> String {
    let spaced = path.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weave_gate::InMemoryMeetingDirectory;
    use weave_org::NewCircle;

    struct Harness {
        manager: ProposalLifecycleManager,
        meetings: Arc<InMemoryMeetingDirectory>,
        workspace: WorkspaceId,
        circle: weave_types::Circle,
        creator: PersonId,
    }

    fn harness() -> Harness {
        let history = Arc::new(VersionHistoryRecorder::new());
        let directory = Arc::new(OrgDirectory::new(history.clone()));
        let meetings = Arc::new(InMemoryMeetingDirectory::new());
        let workspace = WorkspaceId::generate();
        let creator = PersonId::generate();
        let circle = directory
            .create_circle(NewCircle {
                workspace_id: workspace.clone(),
                name: "Product".to_string(),
                purpose: None,
                parent_circle_id: None,
                circle_type: None,
                decision_model: None,
                created_by: creator.clone(),
            })
            .unwrap();
        let manager = ProposalLifecycleManager::new(
            directory,
            history,
            Arc::new(ObjectionLedger::new()),
            meetings.clone(),
        );
        Harness {
            manager,
            meetings,
            workspace,
            circle,
            creator,
        }
    }

    fn rename_change(to: &str) -> FieldChange {
        FieldChange {
            field_path: "name".to_string(),
            field_label: "Name".to_string(),
            before_value: None,
            after_value: Some(json!(to)),
            change_kind: ChangeKind::Update,
        }
    }

    fn draft(h: &Harness) -> Proposal {
        h.manager
            .create(
                &h.creator,
                NewProposal {
                    workspace_id: h.workspace.clone(),
                    target: OrgRef::Circle(h.circle.id.clone()),
                    title: "Rename Product".to_string(),
                    description: "Reflect the new scope".to_string(),
                    changes: vec![rename_change("Platform")],
                },
            )
            .unwrap()
    }

    fn in_meeting(h: &Harness) -> Proposal {
        let proposal = draft(h);
        h.manager.submit(&h.creator, &proposal.id).unwrap();
        let meeting = MeetingId::generate();
        let item = AgendaItemId::generate();
        h.meetings
            .register_agenda_item(h.workspace.clone(), meeting.clone(), item.clone());
        h.manager
            .bind_to_meeting(&h.creator, &proposal.id, meeting, item)
            .unwrap()
    }

    #[test]
    fn empty_draft_cannot_submit() {
        let h = harness();
        let proposal = h
            .manager
            .create(
                &h.creator,
                NewProposal {
                    workspace_id: h.workspace.clone(),
                    target: OrgRef::Circle(h.circle.id.clone()),
                    title: "Empty".to_string(),
                    description: String::new(),
                    changes: vec![],
                },
            )
            .unwrap();
        let err = h.manager.submit(&h.creator, &proposal.id).unwrap_err();
        assert!(matches!(err, LifecycleError::NoChanges(_)));
    }

    #[test]
    fn only_creator_submits() {
        let h = harness();
        let proposal = draft(&h);
        let stranger = PersonId::generate();
        let err = h.manager.submit(&stranger, &proposal.id).unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));
    }

    #[test]
    fn bind_requires_registered_agenda_item() {
        let h = harness();
        let proposal = draft(&h);
        h.manager.submit(&h.creator, &proposal.id).unwrap();
        let err = h
            .manager
            .bind_to_meeting(
                &h.creator,
                &proposal.id,
                MeetingId::generate(),
                AgendaItemId::generate(),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AgendaItemNotFound(_)));
    }

    #[test]
    fn close_without_objections_approves_and_records_history() {
        let h = harness();
        let proposal = in_meeting(&h);
        let closed = h.manager.close(&h.creator, &proposal.id).unwrap();

        assert_eq!(closed.status, ProposalStatus::Approved);
        assert!(closed.processed_at.is_some());
        assert_eq!(closed.processed_by, Some(h.creator.clone()));

        let entry = h
            .manager
            .version_history()
            .history_for_proposal(&proposal.id)
            .unwrap()
            .unwrap();
        assert_eq!(closed.history_entry_id, Some(entry.id));
        assert_eq!(entry.entity_id, h.circle.id.0);

        // The meeting was told the proposal left.
        let meeting = closed.meeting_id.unwrap();
        assert!(h.meetings.proposals_in(&meeting).is_empty());
    }

    #[test]
    fn objection_blocks_close_until_round_resolves() {
        let h = harness();
        let proposal = in_meeting(&h);
        let objector = PersonId::generate();
        let facilitator = PersonId::generate();

        let objection = h
            .manager
            .raise_objection(&objector, &proposal.id, "scope too broad")
            .unwrap();
        assert_eq!(
            h.manager.get(&proposal.id).unwrap().status,
            ProposalStatus::Objections
        );

        let err = h.manager.close(&h.creator, &proposal.id).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

        // Valid ruling: integration requires an amendment first.
        h.manager
            .validate_objection(&facilitator, &objection.id, Validity::Valid, None)
            .unwrap();
        let err = h
            .manager
            .integrate_objection(&facilitator, &objection.id, None)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AmendmentRequired(_)));

        h.manager
            .amend(&h.creator, &proposal.id, vec![rename_change("Platform Core")])
            .unwrap();
        h.manager
            .integrate_objection(&facilitator, &objection.id, None)
            .unwrap();
        assert_eq!(
            h.manager.get(&proposal.id).unwrap().status,
            ProposalStatus::InMeeting
        );

        h.manager.close(&h.creator, &proposal.id).unwrap();
    }

    #[test]
    fn invalid_ruling_resolves_round_without_amendment() {
        let h = harness();
        let proposal = in_meeting(&h);
        let objection = h
            .manager
            .raise_objection(&PersonId::generate(), &proposal.id, "no real tension")
            .unwrap();

        h.manager
            .validate_objection(&PersonId::generate(), &objection.id, Validity::Invalid, None)
            .unwrap();
        assert_eq!(
            h.manager.get(&proposal.id).unwrap().status,
            ProposalStatus::InMeeting
        );
        h.manager.close(&h.creator, &proposal.id).unwrap();
    }

    #[test]
    fn amend_only_during_objections() {
        let h = harness();
        let proposal = in_meeting(&h);
        let err = h
            .manager
            .amend(&h.creator, &proposal.id, vec![rename_change("X")])
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn amendments_continue_the_sequence() {
        let h = harness();
        let proposal = in_meeting(&h);
        h.manager
            .raise_objection(&PersonId::generate(), &proposal.id, "naming")
            .unwrap();
        h.manager
            .amend(
                &h.creator,
                &proposal.id,
                vec![rename_change("Platform Core"), rename_change("Platform")],
            )
            .unwrap();

        let orders: Vec<u32> = h
            .manager
            .list_evolutions(&proposal.id)
            .unwrap()
            .iter()
            .map(|e| e.order)
            .collect();
        assert_eq!(orders, [0, 1, 2]);
    }

    #[test]
    fn amend_and_reject_serialize_on_the_proposal() {
        for _ in 0..20 {
            let h = harness();
            let proposal = in_meeting(&h);
            h.manager
                .raise_objection(&h.creator, &proposal.id, "scope is unclear")
                .unwrap();

            let amended = std::thread::scope(|scope| {
                let amend = scope.spawn(|| {
                    h.manager.amend(
                        &h.creator,
                        &proposal.id,
                        vec![rename_change("Platform Core")],
                    )
                });
                let reject = scope.spawn(|| {
                    h.manager
                        .reject(&h.creator, &proposal.id, "not this quarter".to_string())
                });
                reject.join().unwrap().unwrap();
                amend.join().unwrap()
            });

            let current = h.manager.get(&proposal.id).unwrap();
            assert_eq!(current.status, ProposalStatus::Rejected);
            match amended {
                // The amendment won the guard: every evolution it wrote
                // predates the rejection.
                Ok(evolutions) => {
                    let processed_at = current.processed_at.unwrap();
                    assert!(evolutions.iter().all(|e| e.created_at <= processed_at));
                }
                // The rejection won: the amendment must have been turned
                // away, not half-applied.
                Err(e) => assert!(matches!(e, LifecycleError::InvalidTransition { .. })),
            }
        }
    }

    #[test]
    fn withdraw_from_draft_leaves_no_history() {
        let h = harness();
        let proposal = draft(&h);
        let withdrawn = h.manager.withdraw(&h.creator, &proposal.id).unwrap();
        assert_eq!(withdrawn.status, ProposalStatus::Withdrawn);
        assert!(withdrawn.processed_at.is_some());
        assert!(h
            .manager
            .version_history()
            .history_for_proposal(&proposal.id)
            .unwrap()
            .is_none());

        // Terminal proposals reject further lifecycle calls.
        let err = h.manager.withdraw(&h.creator, &proposal.id).unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
        let err = h
            .manager
            .raise_objection(&h.creator, &proposal.id, "late")
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn reject_records_the_reason() {
        let h = harness();
        let proposal = in_meeting(&h);
        let rejected = h
            .manager
            .reject(&h.creator, &proposal.id, "duplicate of an earlier decision".to_string())
            .unwrap();
        assert_eq!(rejected.status, ProposalStatus::Rejected);
        assert_eq!(
            rejected.resolution_note.as_deref(),
            Some("duplicate of an earlier decision")
        );
    }

    #[test]
    fn close_conflicts_when_target_archived_underneath() {
        let h = harness();
        let proposal = in_meeting(&h);
        h.manager
            .directory
            .archive_circle(&h.circle.id, &h.creator)
            .unwrap();

        let err = h.manager.close(&h.creator, &proposal.id).unwrap_err();
        assert!(matches!(err, LifecycleError::TargetEntityConflict(_)));

        // Still in meeting, untouched, so the caller can reject instead.
        let current = h.manager.get(&proposal.id).unwrap();
        assert_eq!(current.status, ProposalStatus::InMeeting);
        assert!(current.history_entry_id.is_none());
        h.manager
            .reject(&h.creator, &proposal.id, "target was archived".to_string())
            .unwrap();
    }

    #[test]
    fn create_from_diff_derives_change_kinds() {
        let h = harness();
        let before = json!({"name": "Product", "purpose": "Ship"});
        let after = json!({"name": "Platform", "is_hiring": true});
        let proposal = h
            .manager
            .create_from_diff(
                &h.creator,
                h.workspace.clone(),
                OrgRef::Circle(h.circle.id.clone()),
                "Restructure".to_string(),
                String::new(),
                before.as_object().unwrap(),
                after.as_object().unwrap(),
            )
            .unwrap();

        assert_eq!(proposal.status, ProposalStatus::Submitted);
        let evolutions = h.manager.list_evolutions(&proposal.id).unwrap();
        let kinds: Vec<(&str, ChangeKind)> = evolutions
            .iter()
            .map(|e| (e.field_path.as_str(), e.change_kind))
            .collect();
        assert_eq!(
            kinds,
            [
                ("is_hiring", ChangeKind::Add),
                ("name", ChangeKind::Update),
                ("purpose", ChangeKind::Remove),
            ]
        );

        // A diff with no differences has nothing to propose.
        let same = json!({"name": "Product"});
        let err = h
            .manager
            .create_from_diff(
                &h.creator,
                h.workspace.clone(),
                OrgRef::Circle(h.circle.id.clone()),
                "No-op".to_string(),
                String::new(),
                same.as_object().unwrap(),
                same.as_object().unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NoChanges(_)));
    }

    #[test]
    fn draft_evolutions_editable_by_creator_only() {
        let h = harness();
        let proposal = draft(&h);
        let added = h
            .manager
            .add_evolution(&h.creator, &proposal.id, rename_change("Platform X"))
            .unwrap();
        assert_eq!(added.order, 1);

        let stranger = PersonId::generate();
        let err = h
            .manager
            .remove_evolution(&stranger, &proposal.id, &added.id)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden(_)));

        h.manager
            .remove_evolution(&h.creator, &proposal.id, &added.id)
            .unwrap();
        assert_eq!(h.manager.list_evolutions(&proposal.id).unwrap().len(), 1);

        // Once submitted the list is append-only.
        h.manager.submit(&h.creator, &proposal.id).unwrap();
        let remaining = h.manager.list_evolutions(&proposal.id).unwrap();
        let err = h
            .manager
            .remove_evolution(&h.creator, &proposal.id, &remaining[0].id)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));
    }

    #[test]
    fn attachments_removed_only_explicitly() {
        let h = harness();
        let proposal = draft(&h);
        let attachment = h
            .manager
            .attach_file(
                &h.creator,
                &proposal.id,
                FileId::generate(),
                "org-chart.pdf".to_string(),
                8_192,
            )
            .unwrap();
        assert_eq!(h.manager.list_attachments(&proposal.id).unwrap().len(), 1);

        h.manager
            .remove_attachment(&h.creator, &proposal.id, &attachment.id)
            .unwrap();
        assert!(h.manager.list_attachments(&proposal.id).unwrap().is_empty());

        let err = h
            .manager
            .remove_attachment(&h.creator, &proposal.id, &attachment.id)
            .unwrap_err();
        assert!(matches!(err, LifecycleError::AttachmentNotFound(_)));
    }

    #[test]
    fn cross_workspace_target_rejected() {
        let h = harness();
        let err = h
            .manager
            .create(
                &h.creator,
                NewProposal {
                    workspace_id: WorkspaceId::generate(),
                    target: OrgRef::Circle(h.circle.id.clone()),
                    title: "Wrong tenant".to_string(),
                    description: String::new(),
                    changes: vec![rename_change("X")],
                },
            )
            .unwrap_err();
        assert!(matches!(err, LifecycleError::WorkspaceMismatch(_)));
    }
}
