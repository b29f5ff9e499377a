//! Proposal workflow records: the proposal itself, its evolutions
//! (field-level diffs), attachments, and objections.

use crate::ids::{
    AgendaItemId, AttachmentId, EvolutionId, FileId, HistoryEntryId, MeetingId, ObjectionId,
    PersonId, ProposalId, WorkspaceId,
};
use crate::org::OrgRef;
use serde::{Deserialize, Serialize};

/// Proposal lifecycle status.
///
/// ```text
/// draft → submitted → in_meeting → objections ⇄ integrated → in_meeting → approved
/// ```
/// `withdrawn` and `rejected` are terminal exits from any non-terminal
/// state. `approved` is reachable only from `in_meeting`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Submitted,
    InMeeting,
    Objections,
    Integrated,
    Approved,
    Rejected,
    Withdrawn,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Approved | ProposalStatus::Rejected | ProposalStatus::Withdrawn
        )
    }

    /// Whether new objections may be raised in this state.
    pub fn objection_window_open(self) -> bool {
        matches!(self, ProposalStatus::InMeeting | ProposalStatus::Objections)
    }

    /// The transition graph. Terminal states admit nothing; withdrawal and
    /// rejection are reachable from every non-terminal state.
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Rejected | Withdrawn) {
            return true;
        }
        matches!(
            (self, next),
            (Draft, Submitted)
                | (Submitted, InMeeting)
                | (InMeeting, Objections)
                | (InMeeting, Approved)
                | (Objections, Integrated)
                | (Integrated, InMeeting)
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Submitted => "submitted",
            ProposalStatus::InMeeting => "in_meeting",
            ProposalStatus::Objections => "objections",
            ProposalStatus::Integrated => "integrated",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Withdrawn => "withdrawn",
        };
        write!(f, "{name}")
    }
}

/// A pending or resolved change to one circle or role.
///
/// The target reference is immutable after creation. Terminal proposals
/// are never deleted; they are the audit record of the decision.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub workspace_id: WorkspaceId,
    pub target: OrgRef,
    /// The circle governance happens in: the target circle itself, or the
    /// circle owning the target role.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circle_id: Option<crate::ids::CircleId>,
    pub title: String,
    pub description: String,
    pub status: ProposalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meeting_id: Option<MeetingId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agenda_item_id: Option<AgendaItemId>,
    /// Set on adoption: the history entry produced by applying this
    /// proposal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_entry_id: Option<HistoryEntryId>,
    pub created_by: PersonId,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<PersonId>,
    /// Reason recorded when the proposal was rejected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_note: Option<String>,
}

/// Kind of change a single evolution describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Add,
    Update,
    Remove,
}

/// One field-level diff in a proposal's payload. Append-only: evolutions
/// are never edited once recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalEvolution {
    pub id: EvolutionId,
    pub proposal_id: ProposalId,
    /// Entity field the change applies to, e.g. `name` or `purpose`.
    pub field_path: String,
    /// Human label shown in meeting UIs, e.g. "Circle Name".
    pub field_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_value: Option<serde_json::Value>,
    pub change_kind: ChangeKind,
    /// Sequence within the proposal, across draft edits and amendment
    /// rounds.
    pub order: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Caller-supplied payload for one field change; the lifecycle manager
/// turns these into ordered [`ProposalEvolution`] records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldChange {
    pub field_path: String,
    pub field_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_value: Option<serde_json::Value>,
    pub change_kind: ChangeKind,
}

/// File reference attached to a proposal.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProposalAttachment {
    pub id: AttachmentId,
    pub proposal_id: ProposalId,
    pub file_id: FileId,
    pub file_name: String,
    pub size_bytes: u64,
    pub uploaded_by: PersonId,
    pub uploaded_at: chrono::DateTime<chrono::Utc>,
}

/// Facilitator ruling on an objection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Valid,
    Invalid,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntegrationState {
    Pending,
    Integrated,
}

/// An objection raised against a proposal while its window is open.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Objection {
    pub id: ObjectionId,
    pub proposal_id: ProposalId,
    pub raised_by: PersonId,
    pub body: String,
    /// Unset until the facilitator rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validity: Option<Validity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<PersonId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_note: Option<String>,
    pub integration: IntegrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integration_note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub integrated_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl Objection {
    /// Valid and not yet integrated. This is the predicate that gates
    /// proposal closure.
    pub fn is_outstanding(&self) -> bool {
        self.validity == Some(Validity::Valid) && self.integration == IntegrationState::Pending
    }

    /// Blocks the current round: either awaiting a ruling, or ruled valid
    /// and awaiting integration.
    pub fn blocks_round(&self) -> bool {
        match self.validity {
            None => true,
            Some(Validity::Valid) => self.integration == IntegrationState::Pending,
            Some(Validity::Invalid) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_admit_no_transitions() {
        for terminal in [
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
            ProposalStatus::Withdrawn,
        ] {
            for next in [
                ProposalStatus::Draft,
                ProposalStatus::Submitted,
                ProposalStatus::InMeeting,
                ProposalStatus::Objections,
                ProposalStatus::Integrated,
                ProposalStatus::Approved,
                ProposalStatus::Rejected,
                ProposalStatus::Withdrawn,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn approved_only_reachable_from_in_meeting() {
        for from in [
            ProposalStatus::Draft,
            ProposalStatus::Submitted,
            ProposalStatus::Objections,
            ProposalStatus::Integrated,
        ] {
            assert!(!from.can_transition_to(ProposalStatus::Approved));
        }
        assert!(ProposalStatus::InMeeting.can_transition_to(ProposalStatus::Approved));
    }

    #[test]
    fn withdrawal_reachable_from_all_non_terminal_states() {
        for from in [
            ProposalStatus::Draft,
            ProposalStatus::Submitted,
            ProposalStatus::InMeeting,
            ProposalStatus::Objections,
            ProposalStatus::Integrated,
        ] {
            assert!(from.can_transition_to(ProposalStatus::Withdrawn));
            assert!(from.can_transition_to(ProposalStatus::Rejected));
        }
    }

    #[test]
    fn invalid_objection_never_outstanding() {
        let objection = Objection {
            id: ObjectionId::generate(),
            proposal_id: ProposalId::generate(),
            raised_by: PersonId::generate(),
            body: "scope overlap".to_string(),
            validity: Some(Validity::Invalid),
            validated_by: Some(PersonId::generate()),
            validated_at: Some(chrono::Utc::now()),
            validation_note: None,
            integration: IntegrationState::Pending,
            integration_note: None,
            integrated_at: None,
            created_at: chrono::Utc::now(),
        };
        assert!(!objection.is_outstanding());
        assert!(!objection.blocks_round());
    }
}
