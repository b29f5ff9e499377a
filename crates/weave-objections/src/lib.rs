//! Weave Objections - the objection ledger
//!
//! Objections are append-only records against a proposal. Each one moves
//! through at most two one-way gates: a facilitator ruling (valid or
//! invalid, set exactly once) and, for valid objections, an integration
//! mark. The ledger answers the question the lifecycle cares about:
//! does this proposal still have outstanding objections?

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::info;
use weave_types::{
    IntegrationState, Objection, ObjectionId, PersonId, ProposalId, Validity,
};

/// Objection ledger errors.
#[derive(Debug, Error)]
pub enum ObjectionError {
    #[error("Objection not found: {0}")]
    ObjectionNotFound(String),

    #[error("Objection {0} has already been validated")]
    AlreadyValidated(String),

    #[error("Objection {0} is not valid and cannot be integrated")]
    ObjectionNotValid(String),

    #[error("Objection {0} has already been integrated")]
    AlreadyIntegrated(String),

    #[error("Objection body must not be empty")]
    EmptyBody,

    #[error("Lock error")]
    LockError,
}

/// In-memory store of objections, indexed by proposal.
pub struct ObjectionLedger {
    objections: RwLock<HashMap<ObjectionId, Objection>>,
    by_proposal: RwLock<HashMap<ProposalId, Vec<ObjectionId>>>,
}

impl ObjectionLedger {
    pub fn new() -> Self {
        Self {
            objections: RwLock::new(HashMap::new()),
            by_proposal: RwLock::new(HashMap::new()),
        }
    }

    /// Record a new objection. The caller enforces the proposal-side
    /// window; the ledger only refuses empty bodies.
    pub fn raise(
        &self,
        proposal_id: &ProposalId,
        raised_by: &PersonId,
        body: &str,
    ) -> Result<Objection, ObjectionError> {
        if body.trim().is_empty() {
            return Err(ObjectionError::EmptyBody);
        }

        let objection = Objection {
            id: ObjectionId::generate(),
            proposal_id: proposal_id.clone(),
            raised_by: raised_by.clone(),
            body: body.trim().to_string(),
            validity: None,
            validated_by: None,
            validated_at: None,
            validation_note: None,
            integration: IntegrationState::Pending,
            integration_note: None,
            integrated_at: None,
            created_at: chrono::Utc::now(),
        };

        let mut objections = self.objections.write().map_err(|_| ObjectionError::LockError)?;
        let mut by_proposal = self.by_proposal.write().map_err(|_| ObjectionError::LockError)?;
        by_proposal
            .entry(proposal_id.clone())
            .or_default()
            .push(objection.id.clone());
        objections.insert(objection.id.clone(), objection.clone());
        info!(objection = %objection.id, proposal = %proposal_id, "objection raised");
        Ok(objection)
    }

    /// Rule the objection valid or invalid. A ruling is final.
    pub fn validate(
        &self,
        id: &ObjectionId,
        validity: Validity,
        validated_by: &PersonId,
        note: Option<String>,
    ) -> Result<Objection, ObjectionError> {
        let mut objections = self.objections.write().map_err(|_| ObjectionError::LockError)?;
        let objection = objections
            .get_mut(id)
            .ok_or_else(|| ObjectionError::ObjectionNotFound(id.0.clone()))?;
        if objection.validity.is_some() {
            return Err(ObjectionError::AlreadyValidated(id.0.clone()));
        }
        objection.validity = Some(validity);
        objection.validated_by = Some(validated_by.clone());
        objection.validated_at = Some(chrono::Utc::now());
        objection.validation_note = note;
        info!(objection = %id, ruling = ?validity, "objection validated");
        Ok(objection.clone())
    }

    /// Mark a valid objection as integrated into the proposal. Refuses
    /// objections that were never ruled valid. Like the ruling, the
    /// integration mark is set exactly once.
    pub fn mark_integrated(
        &self,
        id: &ObjectionId,
        note: Option<String>,
    ) -> Result<Objection, ObjectionError> {
        let mut objections = self.objections.write().map_err(|_| ObjectionError::LockError)?;
        let objection = objections
            .get_mut(id)
            .ok_or_else(|| ObjectionError::ObjectionNotFound(id.0.clone()))?;
        if objection.validity != Some(Validity::Valid) {
            return Err(ObjectionError::ObjectionNotValid(id.0.clone()));
        }
        if objection.integration == IntegrationState::Integrated {
            return Err(ObjectionError::AlreadyIntegrated(id.0.clone()));
        }
        objection.integration = IntegrationState::Integrated;
        objection.integration_note = note;
        objection.integrated_at = Some(chrono::Utc::now());
        info!(objection = %id, "objection integrated");
        Ok(objection.clone())
    }

    pub fn get(&self, id: &ObjectionId) -> Result<Objection, ObjectionError> {
        let objections = self.objections.read().map_err(|_| ObjectionError::LockError)?;
        objections
            .get(id)
            .cloned()
            .ok_or_else(|| ObjectionError::ObjectionNotFound(id.0.clone()))
    }

    /// All objections against a proposal, oldest first.
    pub fn list_for(&self, proposal_id: &ProposalId) -> Result<Vec<Objection>, ObjectionError> {
        let objections = self.objections.read().map_err(|_| ObjectionError::LockError)?;
        let by_proposal = self.by_proposal.read().map_err(|_| ObjectionError::LockError)?;
        Ok(by_proposal
            .get(proposal_id)
            .map(|ids| ids.iter().filter_map(|id| objections.get(id).cloned()).collect())
            .unwrap_or_default())
    }

    /// True while any objection is valid and not yet integrated.
    pub fn has_outstanding(&self, proposal_id: &ProposalId) -> Result<bool, ObjectionError> {
        Ok(self
            .list_for(proposal_id)?
            .iter()
            .any(Objection::is_outstanding))
    }

    /// True while any objection still blocks the current objection round:
    /// awaiting a ruling, or valid and awaiting integration.
    pub fn has_blocking(&self, proposal_id: &ProposalId) -> Result<bool, ObjectionError> {
        Ok(self
            .list_for(proposal_id)?
            .iter()
            .any(Objection::blocks_round))
    }
}

impl Default for ObjectionLedger {
    fn default() -> Self {
        Self::new()
    }
}
