use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::domain::{
    Agent, AgentId, Assignment, AssignmentId, AssignmentStatus, Lead, LeadId, LeadStatus,
};

/// Failures surfaced by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record was modified concurrently")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read and status-write access to the lead pipeline.
pub trait LeadRepository: Send + Sync {
    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
    fn update_status(
        &self,
        id: &LeadId,
        status: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError>;
}

/// Access to the agent roster and its workload counters.
pub trait AgentRepository: Send + Sync {
    fn fetch(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError>;
    fn list_active(&self) -> Result<Vec<Agent>, RepositoryError>;
    /// Applies a signed delta to the open-lead counter, clamping at zero.
    fn adjust_workload(&self, id: &AgentId, delta: i32) -> Result<Agent, RepositoryError>;
}

/// Persistence for assignments. `update_if_status` is the compare-and-set
/// primitive the state machine is built on: the write only lands when the
/// stored status still matches `expected`.
pub trait AssignmentRepository: Send + Sync {
    fn insert(&self, assignment: Assignment) -> Result<Assignment, RepositoryError>;
    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError>;
    fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError>;
    fn list_pending_older_than(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError>;
    fn update_if_status(
        &self,
        updated: Assignment,
        expected: AssignmentStatus,
    ) -> Result<Assignment, RepositoryError>;
}

/// Kinds of entries in the routing audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Assigned,
    Reassigned,
    StatusChanged,
    OutcomeRecorded,
    ConfigUpdated,
    WebhookIgnored,
}

impl AuditKind {
    pub const fn label(self) -> &'static str {
        match self {
            AuditKind::Assigned => "assigned",
            AuditKind::Reassigned => "reassigned",
            AuditKind::StatusChanged => "status_changed",
            AuditKind::OutcomeRecorded => "outcome_recorded",
            AuditKind::ConfigUpdated => "config_updated",
            AuditKind::WebhookIgnored => "webhook_ignored",
        }
    }
}

/// One audit trail entry. Ids are optional because not every event touches
/// every entity.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub lead_id: Option<LeadId>,
    pub agent_id: Option<AgentId>,
    pub assignment_id: Option<AssignmentId>,
    pub details: BTreeMap<String, String>,
    pub at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, at: DateTime<Utc>) -> Self {
        Self {
            kind,
            lead_id: None,
            agent_id: None,
            assignment_id: None,
            details: BTreeMap::new(),
            at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit transport unavailable: {0}")]
    Transport(String),
}

/// Destination for audit events. Delivery is best effort; routing operations
/// never fail because the sink did.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;
}

/// Source of assignment identifiers, injected so tests stay deterministic.
pub trait IdSource: Send + Sync {
    fn next_assignment_id(&self) -> AssignmentId;
}

/// Process-local sequential ids in the `asg-000001` format.
#[derive(Debug)]
pub struct SequentialIds {
    counter: AtomicU64,
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self {
            counter: AtomicU64::new(1),
        }
    }
}

impl IdSource for SequentialIds {
    fn next_assignment_id(&self) -> AssignmentId {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        AssignmentId(format!("asg-{id:06}"))
    }
}
