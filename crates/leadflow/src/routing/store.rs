use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::domain::{Agent, Assignment, AssignmentId, AssignmentStatus, Lead, LeadId, RoutingError};
use super::repository::{AssignmentRepository, IdSource, RepositoryError};

/// Optional fields attached to a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionMetadata {
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub conversion_value: Option<f64>,
}

/// Gatekeeper for assignment state. Every status change in the engine flows
/// through [`AssignmentStore::transition`], which enforces the legal edges and
/// stamps the matching timestamp exactly once.
pub struct AssignmentStore<R> {
    repository: Arc<R>,
    ids: Arc<dyn IdSource>,
}

impl<R> AssignmentStore<R>
where
    R: AssignmentRepository,
{
    pub fn new(repository: Arc<R>, ids: Arc<dyn IdSource>) -> Self {
        Self { repository, ids }
    }

    /// Persists a fresh `Pending` assignment for the pairing.
    pub fn create(
        &self,
        lead: &Lead,
        agent: &Agent,
        confidence: f64,
        notes: Option<String>,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Result<Assignment, RoutingError> {
        let assignment = Assignment::pending(
            self.ids.next_assignment_id(),
            lead.id.clone(),
            agent.id.clone(),
            confidence,
            now,
            now + timeout,
            notes,
        );
        Ok(self.repository.insert(assignment)?)
    }

    pub fn get(&self, id: &AssignmentId) -> Result<Assignment, RoutingError> {
        self.repository
            .fetch(id)?
            .ok_or_else(|| RoutingError::AssignmentNotFound(id.clone()))
    }

    pub fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RoutingError> {
        Ok(self.repository.find_by_lead(lead_id)?)
    }

    /// The open (pending or accepted) assignment for a lead, if one exists.
    pub fn settleable_for_lead(
        &self,
        lead_id: &LeadId,
    ) -> Result<Option<Assignment>, RoutingError> {
        Ok(self
            .repository
            .find_by_lead(lead_id)?
            .into_iter()
            .find(Assignment::is_settleable))
    }

    pub fn list_pending_older_than(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RoutingError> {
        Ok(self.repository.list_pending_older_than(max_age, now)?)
    }

    /// Moves an assignment along one legal edge of the state machine.
    ///
    /// The write is a compare-and-set against the status we read. Losing that
    /// race once triggers a single re-read and re-decide; losing again
    /// surfaces [`RoutingError::Conflict`].
    pub fn transition(
        &self,
        id: &AssignmentId,
        next: AssignmentStatus,
        metadata: TransitionMetadata,
        now: DateTime<Utc>,
    ) -> Result<Assignment, RoutingError> {
        let current = self.get(id)?;
        let expected = current.status;
        let updated = apply_transition(current, next, &metadata, now)?;
        match self.repository.update_if_status(updated, expected) {
            Ok(stored) => Ok(stored),
            Err(RepositoryError::Conflict) => {
                let current = self.get(id)?;
                let expected = current.status;
                let updated = apply_transition(current, next, &metadata, now)?;
                match self.repository.update_if_status(updated, expected) {
                    Ok(stored) => Ok(stored),
                    Err(RepositoryError::Conflict) => Err(RoutingError::Conflict),
                    Err(other) => Err(other.into()),
                }
            }
            Err(other) => Err(other.into()),
        }
    }
}

fn apply_transition(
    mut assignment: Assignment,
    next: AssignmentStatus,
    metadata: &TransitionMetadata,
    now: DateTime<Utc>,
) -> Result<Assignment, RoutingError> {
    if !assignment.status.can_transition_to(next) {
        return Err(RoutingError::InvalidTransition {
            from: assignment.status,
            to: next,
        });
    }

    match next {
        AssignmentStatus::Accepted => assignment.accepted_at = Some(now),
        AssignmentStatus::Rejected => {
            assignment.rejected_at = Some(now);
            assignment.rejection_reason = metadata.rejection_reason.clone();
        }
        AssignmentStatus::Expired => assignment.expired_at = Some(now),
        AssignmentStatus::Cancelled => assignment.cancelled_at = Some(now),
        AssignmentStatus::Completed => assignment.completed_at = Some(now),
        AssignmentStatus::Converted => {
            assignment.completed_at = Some(now);
            assignment.conversion_value = metadata.conversion_value;
        }
        // can_transition_to never admits Pending as a target.
        AssignmentStatus::Pending => unreachable!("pending is never a transition target"),
    }

    if let Some(notes) = &metadata.notes {
        assignment.notes = Some(notes.clone());
    }
    assignment.status = next;
    Ok(assignment)
}
