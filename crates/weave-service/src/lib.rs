//! Weave Service - the authenticated facade over the governance core
//!
//! One struct wires the pieces together: the access gate resolves every
//! caller before any state is read, the lifecycle manager drives the
//! proposal state machine, and the ledger and recorder answer the read
//! side. Hosts embed [`GovernanceService`] and hand it session tokens;
//! nothing below this layer knows about sessions.

#![deny(unsafe_code)]

use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use weave_gate::{AccessGate, MeetingBinding};
use weave_history::{HistoryError, VersionHistoryRecorder};
use weave_objections::{ObjectionError, ObjectionLedger};
use weave_org::{ActiveFilter, OrgDirectory};
use weave_proposals::{LifecycleError, NewProposal, ProposalLifecycleManager};
use weave_types::{
    AgendaItemId, AttachmentId, CircleId, EntityKind, FieldChange, FileId, MeetingId, Objection,
    ObjectionId, OrgRef, PersonId, Proposal, ProposalAttachment, ProposalEvolution, ProposalId,
    ProposalStatus, Validity, VersionHistoryEntry, WorkspaceId,
};

/// Facade errors. `Unauthorized` always wins: it is produced before any
/// state is read, so a rejected caller learns nothing about what exists.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Objection(#[from] ObjectionError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl From<weave_gate::GateError> for GovernanceError {
    fn from(_: weave_gate::GateError) -> Self {
        GovernanceError::Unauthorized
    }
}

/// The governance engine with its seams plugged in.
pub struct GovernanceService {
    gate: Arc<dyn AccessGate>,
    directory: Arc<OrgDirectory>,
    lifecycle: ProposalLifecycleManager,
}

impl GovernanceService {
    /// Wire the seams together. The `directory` must have been built with
    /// the same `history` recorder, so direct structure changes and
    /// proposal adoptions land on one trail.
    pub fn new(
        gate: Arc<dyn AccessGate>,
        directory: Arc<OrgDirectory>,
        history: Arc<VersionHistoryRecorder>,
        objections: Arc<ObjectionLedger>,
        meetings: Arc<dyn MeetingBinding>,
    ) -> Self {
        info!("governance service initialized");
        Self {
            gate,
            directory: directory.clone(),
            lifecycle: ProposalLifecycleManager::new(directory, history, objections, meetings),
        }
    }

    /// The org directory, for hosts that manage structure directly.
    pub fn directory(&self) -> &OrgDirectory {
        &self.directory
    }

    // ============ Mutations ============

    pub fn create_proposal(
        &self,
        session_token: &str,
        new: NewProposal,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        let circle = self.governing_circle(&new.target)?;
        if !self.gate.can_propose_on(&actor, &circle) {
            return Err(GovernanceError::Unauthorized);
        }
        Ok(self.lifecycle.create(&actor, new)?)
    }

    pub fn create_proposal_from_diff(
        &self,
        session_token: &str,
        workspace_id: WorkspaceId,
        target: OrgRef,
        title: String,
        description: String,
        before: &serde_json::Map<String, serde_json::Value>,
        after: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        let circle = self.governing_circle(&target)?;
        if !self.gate.can_propose_on(&actor, &circle) {
            return Err(GovernanceError::Unauthorized);
        }
        Ok(self.lifecycle.create_from_diff(
            &actor,
            workspace_id,
            target,
            title,
            description,
            before,
            after,
        )?)
    }

    pub fn submit_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.submit(&actor, proposal_id)?)
    }

    pub fn bind_proposal_to_meeting(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        meeting_id: MeetingId,
        agenda_item_id: AgendaItemId,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .bind_to_meeting(&actor, proposal_id, meeting_id, agenda_item_id)?)
    }

    pub fn amend_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        changes: Vec<FieldChange>,
    ) -> Result<Vec<ProposalEvolution>, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.amend(&actor, proposal_id, changes)?)
    }

    pub fn raise_objection(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        body: &str,
    ) -> Result<Objection, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.raise_objection(&actor, proposal_id, body)?)
    }

    pub fn validate_objection(
        &self,
        session_token: &str,
        objection_id: &ObjectionId,
        validity: Validity,
        note: Option<String>,
    ) -> Result<Objection, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .validate_objection(&actor, objection_id, validity, note)?)
    }

    pub fn integrate_objection(
        &self,
        session_token: &str,
        objection_id: &ObjectionId,
        note: Option<String>,
    ) -> Result<Objection, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.integrate_objection(&actor, objection_id, note)?)
    }

    pub fn close_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.close(&actor, proposal_id)?)
    }

    pub fn reject_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        reason: String,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.reject(&actor, proposal_id, reason)?)
    }

    pub fn withdraw_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.withdraw(&actor, proposal_id)?)
    }

    pub fn attach_file_to_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        file_id: FileId,
        file_name: String,
        size_bytes: u64,
    ) -> Result<ProposalAttachment, GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .attach_file(&actor, proposal_id, file_id, file_name, size_bytes)?)
    }

    pub fn remove_attachment(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
        attachment_id: &AttachmentId,
    ) -> Result<(), GovernanceError> {
        let actor = self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .remove_attachment(&actor, proposal_id, attachment_id)?)
    }

    // ============ Reads ============

    pub fn get_proposal(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Proposal, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.get(proposal_id)?)
    }

    pub fn list_proposals_by_workspace(
        &self,
        session_token: &str,
        workspace_id: &WorkspaceId,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.list_by_workspace(workspace_id, status)?)
    }

    pub fn list_proposals_by_entity(
        &self,
        session_token: &str,
        target: &OrgRef,
    ) -> Result<Vec<Proposal>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.list_by_entity(target)?)
    }

    pub fn list_objections(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Vec<Objection>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.objection_ledger().list_for(proposal_id)?)
    }

    pub fn list_evolutions(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Vec<ProposalEvolution>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.list_evolutions(proposal_id)?)
    }

    pub fn list_attachments(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Vec<ProposalAttachment>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.list_attachments(proposal_id)?)
    }

    /// Full mutation history of one entity, oldest first.
    pub fn get_entity_history(
        &self,
        session_token: &str,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<VersionHistoryEntry>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self.lifecycle.version_history().history_for(kind, entity_id)?)
    }

    /// The entry an adopted proposal produced, if any.
    pub fn get_proposal_history_entry(
        &self,
        session_token: &str,
        proposal_id: &ProposalId,
    ) -> Result<Option<VersionHistoryEntry>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .version_history()
            .history_for_proposal(proposal_id)?)
    }

    /// Workspace-wide change timeline, optionally windowed.
    pub fn get_workspace_timeline(
        &self,
        session_token: &str,
        workspace_id: &WorkspaceId,
        since: Option<chrono::DateTime<chrono::Utc>>,
        until: Option<chrono::DateTime<chrono::Utc>>,
    ) -> Result<Vec<VersionHistoryEntry>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .version_history()
            .timeline(workspace_id, since, until)?)
    }

    /// Everything one person changed in a workspace.
    pub fn get_person_changes(
        &self,
        session_token: &str,
        workspace_id: &WorkspaceId,
        person: &PersonId,
    ) -> Result<Vec<VersionHistoryEntry>, GovernanceError> {
        self.gate.resolve_actor(session_token)?;
        Ok(self
            .lifecycle
            .version_history()
            .changes_by_person(workspace_id, person)?)
    }

    /// The circle a proposal against this target is governed by.
    fn governing_circle(&self, target: &OrgRef) -> Result<CircleId, GovernanceError> {
        match target {
            OrgRef::Circle(id) => Ok(id.clone()),
            OrgRef::Role(id) => self
                .directory
                .get_role(id, ActiveFilter::ActiveOnly)
                .map(|r| r.circle_id)
                .map_err(|_| {
                    GovernanceError::Lifecycle(LifecycleError::EntityNotFound(id.0.clone()))
                }),
        }
    }
}
