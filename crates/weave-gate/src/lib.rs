//! Weave Gate - the seams to the outside of the governance core
//!
//! Two traits keep the lifecycle independent of whatever hosts it: an
//! [`AccessGate`] that turns opaque session tokens into people and
//! answers permission checks, and a [`MeetingBinding`] that vouches for
//! agenda items and hears about proposals entering or leaving meetings.
//! In-memory implementations back tests and embedded deployments.

#![deny(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;
use weave_types::{AgendaItemId, CircleId, MeetingId, PersonId, ProposalId, WorkspaceId};

#[derive(Debug, Error)]
pub enum GateError {
    #[error("Session token is not recognized")]
    UnknownSession,

    #[error("Lock error")]
    LockError,
}

/// Resolves callers and answers permission questions. Resolution happens
/// before any state is read, so an unknown session never observes
/// whether a proposal exists.
pub trait AccessGate: Send + Sync {
    fn resolve_actor(&self, session_token: &str) -> Result<PersonId, GateError>;

    /// Whether the person may open proposals against entities of this
    /// circle. Workspace admission is implied by session resolution.
    fn can_propose_on(&self, person: &PersonId, circle: &CircleId) -> bool;
}

/// The meeting system's side of the handshake: it vouches for agenda
/// items and is told when a proposal enters or leaves a meeting.
pub trait MeetingBinding: Send + Sync {
    fn agenda_item_exists(
        &self,
        workspace: &WorkspaceId,
        meeting: &MeetingId,
        agenda_item: &AgendaItemId,
    ) -> bool;

    fn on_proposal_entered_meeting(&self, proposal: &ProposalId, meeting: &MeetingId);

    fn on_proposal_left_meeting(&self, proposal: &ProposalId, meeting: &MeetingId);
}

/// Token-to-person table with an optional propose allowlist per circle.
/// An absent allowlist means every resolved person may propose.
pub struct StaticAccessGate {
    sessions: RwLock<HashMap<String, PersonId>>,
    proposers: RwLock<HashMap<CircleId, HashSet<PersonId>>>,
}

impl StaticAccessGate {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            proposers: RwLock::new(HashMap::new()),
        }
    }

    pub fn admit(&self, token: impl Into<String>, person: PersonId) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(token.into(), person);
        }
    }

    pub fn revoke(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.remove(token);
        }
    }

    /// Restrict proposing on a circle to an explicit set of people.
    pub fn restrict_circle(&self, circle: CircleId, allowed: impl IntoIterator<Item = PersonId>) {
        if let Ok(mut proposers) = self.proposers.write() {
            proposers.insert(circle, allowed.into_iter().collect());
        }
    }
}

impl Default for StaticAccessGate {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessGate for StaticAccessGate {
    fn resolve_actor(&self, session_token: &str) -> Result<PersonId, GateError> {
        let sessions = self.sessions.read().map_err(|_| GateError::LockError)?;
        sessions
            .get(session_token)
            .cloned()
            .ok_or(GateError::UnknownSession)
    }

    fn can_propose_on(&self, person: &PersonId, circle: &CircleId) -> bool {
        match self.proposers.read() {
            Ok(proposers) => proposers
                .get(circle)
                .map_or(true, |allowed| allowed.contains(person)),
            Err(_) => false,
        }
    }
}

/// Meeting directory that tracks registered agenda items and the set of
/// proposals currently bound to each meeting.
pub struct InMemoryMeetingDirectory {
    agenda: RwLock<HashMap<(WorkspaceId, MeetingId), HashSet<AgendaItemId>>>,
    bound: RwLock<HashMap<MeetingId, HashSet<ProposalId>>>,
}

impl InMemoryMeetingDirectory {
    pub fn new() -> Self {
        Self {
            agenda: RwLock::new(HashMap::new()),
            bound: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_agenda_item(
        &self,
        workspace: WorkspaceId,
        meeting: MeetingId,
        agenda_item: AgendaItemId,
    ) {
        if let Ok(mut agenda) = self.agenda.write() {
            agenda.entry((workspace, meeting)).or_default().insert(agenda_item);
        }
    }

    /// Proposals currently sitting in a meeting.
    pub fn proposals_in(&self, meeting: &MeetingId) -> Vec<ProposalId> {
        match self.bound.read() {
            Ok(bound) => bound
                .get(meeting)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }
}

impl Default for InMemoryMeetingDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl MeetingBinding for InMemoryMeetingDirectory {
    fn agenda_item_exists(
        &self,
        workspace: &WorkspaceId,
        meeting: &MeetingId,
        agenda_item: &AgendaItemId,
    ) -> bool {
        match self.agenda.read() {
            Ok(agenda) => agenda
                .get(&(workspace.clone(), meeting.clone()))
                .map_or(false, |items| items.contains(agenda_item)),
            Err(_) => false,
        }
    }

    fn on_proposal_entered_meeting(&self, proposal: &ProposalId, meeting: &MeetingId) {
        if let Ok(mut bound) = self.bound.write() {
            bound.entry(meeting.clone()).or_default().insert(proposal.clone());
        }
        info!(proposal = %proposal, meeting = %meeting, "proposal entered meeting");
    }

    fn on_proposal_left_meeting(&self, proposal: &ProposalId, meeting: &MeetingId) {
        if let Ok(mut bound) = self.bound.write() {
            if let Some(set) = bound.get_mut(meeting) {
                set.remove(proposal);
            }
        }
        info!(proposal = %proposal, meeting = %meeting, "proposal left meeting");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_session_rejected() {
        let gate = StaticAccessGate::new();
        assert!(matches!(
            gate.resolve_actor("nope"),
            Err(GateError::UnknownSession)
        ));

        let alice = PersonId::generate();
        gate.admit("tok-alice", alice.clone());
        assert_eq!(gate.resolve_actor("tok-alice").unwrap(), alice);

        gate.revoke("tok-alice");
        assert!(gate.resolve_actor("tok-alice").is_err());
    }

    #[test]
    fn circle_allowlist_gates_proposing() {
        let gate = StaticAccessGate::new();
        let alice = PersonId::generate();
        let bob = PersonId::generate();
        let circle = CircleId::generate();

        // No allowlist: open to everyone.
        assert!(gate.can_propose_on(&alice, &circle));

        gate.restrict_circle(circle.clone(), [alice.clone()]);
        assert!(gate.can_propose_on(&alice, &circle));
        assert!(!gate.can_propose_on(&bob, &circle));
    }

    #[test]
    fn meeting_directory_tracks_bound_proposals() {
        let directory = InMemoryMeetingDirectory::new();
        let workspace = WorkspaceId::generate();
        let meeting = MeetingId::generate();
        let item = AgendaItemId::generate();
        let proposal = ProposalId::generate();

        assert!(!directory.agenda_item_exists(&workspace, &meeting, &item));
        directory.register_agenda_item(workspace.clone(), meeting.clone(), item.clone());
        assert!(directory.agenda_item_exists(&workspace, &meeting, &item));

        directory.on_proposal_entered_meeting(&proposal, &meeting);
        assert_eq!(directory.proposals_in(&meeting), vec![proposal.clone()]);

        directory.on_proposal_left_meeting(&proposal, &meeting);
        assert!(directory.proposals_in(&meeting).is_empty());
    }
}
