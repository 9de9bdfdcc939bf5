//! Step bookkeeping for the multi-store operations.
//!
//! A saga walks `Start -> Step.. -> Commit | Compensate -> End`. Every step
//! that commits is pushed on a [`SagaLog`], together with the action that
//! undoes it when one exists. When a later step fails the log is unwound in
//! reverse order; steps without an undo action are simply skipped. A step
//! that changed provider state with no way back is marked irreversible, and a
//! later failure then ends the saga as a partial failure.
use std::fmt;

use serde::Serialize;

use crate::membership::Side;

/// Named steps of the user and channel sagas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FetchCurrent,
    ValidateRelations,
    CheckName,
    GenerateIds,
    CreateIdentity,
    UpdateIdentity,
    DeleteIdentity,
    CreateRow,
    PatchRow,
    DeleteRow,
    DetachMemberships,
    AttachMemberships,
}

impl Step {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FetchCurrent => "fetch_current",
            Self::ValidateRelations => "validate_relations",
            Self::CheckName => "check_name",
            Self::GenerateIds => "generate_ids",
            Self::CreateIdentity => "create_identity",
            Self::UpdateIdentity => "update_identity",
            Self::DeleteIdentity => "delete_identity",
            Self::CreateRow => "create_row",
            Self::PatchRow => "patch_row",
            Self::DeleteRow => "delete_row",
            Self::DetachMemberships => "detach_memberships",
            Self::AttachMemberships => "attach_memberships",
        }
    }

    /// Whether a committed step of this kind can be undone.
    ///
    /// This is the compensation table; [`Compensation`] carries the data each
    /// undo action needs.
    pub fn is_compensable(self) -> bool {
        matches!(
            self,
            Self::CreateIdentity | Self::UpdateIdentity | Self::DetachMemberships
        )
    }

    pub(crate) fn join(steps: &[Step]) -> String {
        if steps.is_empty() {
            return "nothing".to_string();
        }
        steps
            .iter()
            .map(|step| step.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undo action recorded for a compensable step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Compensation {
    /// Remove an identity record created by the saga.
    DeleteIdentity { id: String },
    /// Put the identity email back to its value before the saga.
    RestoreIdentityEmail { id: String, email: String },
    /// Re-add `owner` to the reverse lists it was detached from.
    ReattachMemberships {
        owner: String,
        counterparts: Vec<String>,
        side: Side,
    },
}

impl Compensation {
    pub fn step(&self) -> Step {
        match self {
            Self::DeleteIdentity { .. } => Step::CreateIdentity,
            Self::RestoreIdentityEmail { .. } => Step::UpdateIdentity,
            Self::ReattachMemberships { .. } => Step::DetachMemberships,
        }
    }
}

/// Committed steps of a running saga.
#[derive(Debug)]
pub struct SagaLog {
    name: &'static str,
    completed: Vec<Step>,
    undo: Vec<Compensation>,
    irreversible: Vec<Step>,
}

impl SagaLog {
    pub fn new(name: &'static str) -> Self {
        tracing::info!(saga = name, "saga started");
        Self {
            name,
            completed: Vec::new(),
            undo: Vec::new(),
            irreversible: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records a step that has nothing to undo.
    pub fn commit(&mut self, step: Step) {
        tracing::debug!(saga = self.name, %step, "step committed");
        self.completed.push(step);
    }

    /// Records a step together with the action that reverses it.
    pub fn commit_with(&mut self, compensation: Compensation) {
        let step = compensation.step();
        tracing::debug!(saga = self.name, %step, "step committed (compensable)");
        self.completed.push(step);
        self.undo.push(compensation);
    }

    /// Flags a committed step whose effect cannot be fully undone.
    pub fn mark_irreversible(&mut self, step: Step) {
        tracing::debug!(saga = self.name, %step, "step cannot be undone");
        self.irreversible.push(step);
    }

    /// Whether compensating the log brings the stores back to the start state.
    pub fn is_reversible(&self) -> bool {
        self.irreversible.is_empty()
    }

    pub fn completed(&self) -> &[Step] {
        &self.completed
    }

    /// Drains the undo actions, most recent first.
    pub fn take_compensations(&mut self) -> Vec<Compensation> {
        let mut undo = std::mem::take(&mut self.undo);
        undo.reverse();
        undo
    }

    /// Builds the error for a saga that cannot return to its start state.
    pub fn partial_failure(&self, failed: Step, detail: impl Into<String>) -> crate::EngineError {
        let detail = detail.into();
        tracing::error!(
            saga = self.name,
            %failed,
            completed = %Step::join(&self.completed),
            "saga ended in partial failure: {detail}"
        );
        crate::EngineError::PartialFailure {
            saga: self.name,
            completed: self.completed.clone(),
            failed,
            detail,
        }
    }

    /// Closes the saga successfully.
    pub fn finish<T>(self, value: T, unsynced: Vec<String>) -> SagaOutcome<T> {
        if unsynced.is_empty() {
            tracing::info!(saga = self.name, "saga committed");
        } else {
            tracing::warn!(
                saga = self.name,
                unsynced = ?unsynced,
                "saga committed with unsynchronized memberships"
            );
        }
        SagaOutcome {
            value,
            steps: self.completed,
            unsynced,
        }
    }
}

/// Result of a saga that committed its primary write.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaOutcome<T> {
    pub value: T,
    pub steps: Vec<Step>,
    /// Counterpart IDs whose reverse list could not be reconciled.
    pub unsynced: Vec<String>,
}

impl<T> SagaOutcome<T> {
    /// A committed saga whose membership reconciliation was incomplete.
    pub fn is_degraded(&self) -> bool {
        !self.unsynced.is_empty()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> SagaOutcome<U> {
        SagaOutcome {
            value: f(self.value),
            steps: self.steps,
            unsynced: self.unsynced,
        }
    }
}
