use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::routing::config::{RoutingConfig, RoutingConfigHandle};
use crate::routing::coordinator::RoutingCoordinator;
use crate::routing::domain::{
    Agent, AgentId, Assignment, AssignmentId, AssignmentStatus, Lead, LeadId, LeadStatus, Location,
};
use crate::routing::repository::{
    AgentRepository, AssignmentRepository, AuditError, AuditEvent, AuditKind, AuditSink,
    LeadRepository, RepositoryError, SequentialIds,
};
use crate::routing::store::AssignmentStore;

pub(super) type TestCoordinator = RoutingCoordinator<
    MemoryLeadRepository,
    MemoryAgentRepository,
    MemoryAssignmentRepository,
    MemoryAuditSink,
>;

pub(super) fn auto_lead(suffix: &str) -> Lead {
    Lead {
        id: LeadId(format!("lead-{suffix}")),
        insurance_type: Some("auto".to_string()),
        location: Location::new("IA", "Des Moines"),
        quality_score: Some(85.0),
        status: LeadStatus::Qualified,
        updated_at: Utc::now(),
    }
}

pub(super) fn auto_agent(suffix: &str) -> Agent {
    Agent {
        id: AgentId(format!("agent-{suffix}")),
        name: format!("Agent {suffix}"),
        specializations: vec!["auto".to_string()],
        location: Location::new("IA", "Des Moines"),
        is_active: true,
        rating: 4.0,
        conversion_rate: 0.30,
        current_lead_count: 2,
        max_lead_capacity: 10,
    }
}

pub(super) fn routing_config() -> RoutingConfig {
    RoutingConfig {
        min_confidence_threshold: 0.5,
        max_agents_per_lead: 5,
        notification_timeout_ms: 900_000,
        round_robin_enabled: false,
        load_balancing_enabled: true,
    }
}

pub(super) fn build_coordinator(
    config: RoutingConfig,
) -> (
    Arc<TestCoordinator>,
    Arc<MemoryLeadRepository>,
    Arc<MemoryAgentRepository>,
    Arc<MemoryAssignmentRepository>,
    Arc<MemoryAuditSink>,
) {
    let leads = Arc::new(MemoryLeadRepository::default());
    let agents = Arc::new(MemoryAgentRepository::default());
    let assignments = Arc::new(MemoryAssignmentRepository::default());
    let audit = Arc::new(MemoryAuditSink::default());
    let store = AssignmentStore::new(assignments.clone(), Arc::new(SequentialIds::default()));
    let coordinator = Arc::new(RoutingCoordinator::new(
        leads.clone(),
        agents.clone(),
        store,
        audit.clone(),
        RoutingConfigHandle::new(config),
    ));
    (coordinator, leads, agents, assignments, audit)
}

#[derive(Default, Clone)]
pub(super) struct MemoryLeadRepository {
    leads: Arc<Mutex<HashMap<LeadId, Lead>>>,
}

impl MemoryLeadRepository {
    pub(super) fn insert(&self, lead: Lead) {
        self.leads
            .lock()
            .expect("lead mutex poisoned")
            .insert(lead.id.clone(), lead);
    }

    pub(super) fn get(&self, id: &LeadId) -> Option<Lead> {
        self.leads.lock().expect("lead mutex poisoned").get(id).cloned()
    }
}

impl LeadRepository for MemoryLeadRepository {
    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.leads.lock().expect("lead mutex poisoned").get(id).cloned())
    }

    fn update_status(
        &self,
        id: &LeadId,
        status: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut guard = self.leads.lock().expect("lead mutex poisoned");
        let lead = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        lead.status = status;
        lead.updated_at = at;
        Ok(lead.clone())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAgentRepository {
    agents: Arc<Mutex<HashMap<AgentId, Agent>>>,
}

impl MemoryAgentRepository {
    pub(super) fn insert(&self, agent: Agent) {
        self.agents
            .lock()
            .expect("agent mutex poisoned")
            .insert(agent.id.clone(), agent);
    }

    pub(super) fn get(&self, id: &AgentId) -> Option<Agent> {
        self.agents
            .lock()
            .expect("agent mutex poisoned")
            .get(id)
            .cloned()
    }
}

impl AgentRepository for MemoryAgentRepository {
    fn fetch(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self
            .agents
            .lock()
            .expect("agent mutex poisoned")
            .get(id)
            .cloned())
    }

    fn list_active(&self) -> Result<Vec<Agent>, RepositoryError> {
        let guard = self.agents.lock().expect("agent mutex poisoned");
        let mut active: Vec<Agent> = guard.values().filter(|a| a.is_active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    fn adjust_workload(&self, id: &AgentId, delta: i32) -> Result<Agent, RepositoryError> {
        let mut guard = self.agents.lock().expect("agent mutex poisoned");
        let agent = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        agent.current_lead_count = agent.current_lead_count.saturating_add_signed(delta);
        Ok(agent.clone())
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAssignmentRepository {
    assignments: Arc<Mutex<HashMap<AssignmentId, Assignment>>>,
}

impl MemoryAssignmentRepository {
    /// Direct write bypassing the compare-and-set, for planting fixtures.
    pub(super) fn put(&self, assignment: Assignment) {
        self.assignments
            .lock()
            .expect("assignment mutex poisoned")
            .insert(assignment.id.clone(), assignment);
    }

    pub(super) fn get(&self, id: &AssignmentId) -> Option<Assignment> {
        self.assignments
            .lock()
            .expect("assignment mutex poisoned")
            .get(id)
            .cloned()
    }
}

impl AssignmentRepository for MemoryAssignmentRepository {
    fn insert(&self, assignment: Assignment) -> Result<Assignment, RepositoryError> {
        let mut guard = self.assignments.lock().expect("assignment mutex poisoned");
        if guard.contains_key(&assignment.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        Ok(self
            .assignments
            .lock()
            .expect("assignment mutex poisoned")
            .get(id)
            .cloned())
    }

    fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        let guard = self.assignments.lock().expect("assignment mutex poisoned");
        let mut found: Vec<Assignment> = guard
            .values()
            .filter(|a| &a.lead_id == lead_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    fn list_pending_older_than(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        let cutoff = now - max_age;
        let guard = self.assignments.lock().expect("assignment mutex poisoned");
        let mut stale: Vec<Assignment> = guard
            .values()
            .filter(|a| a.status == AssignmentStatus::Pending && a.assigned_at <= cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.assigned_at.cmp(&b.assigned_at).then(a.id.cmp(&b.id)));
        Ok(stale)
    }

    fn update_if_status(
        &self,
        updated: Assignment,
        expected: AssignmentStatus,
    ) -> Result<Assignment, RepositoryError> {
        let mut guard = self.assignments.lock().expect("assignment mutex poisoned");
        match guard.get(&updated.id) {
            None => Err(RepositoryError::NotFound),
            Some(current) if current.status != expected => Err(RepositoryError::Conflict),
            Some(_) => {
                guard.insert(updated.id.clone(), updated.clone());
                Ok(updated)
            }
        }
    }
}

#[derive(Default, Clone)]
pub(super) struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub(super) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit mutex poisoned").clone()
    }

    pub(super) fn kinds(&self) -> Vec<AuditKind> {
        self.events().into_iter().map(|e| e.kind).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .expect("audit mutex poisoned")
            .push(event);
        Ok(())
    }
}

/// Sink whose transport is permanently down.
pub(super) struct FailingAuditSink;

impl AuditSink for FailingAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Err(AuditError::Transport("audit pipe closed".to_string()))
    }
}

/// Fails the first compare-and-set without changing anything, so a retry
/// against unchanged state succeeds.
#[derive(Default)]
pub(super) struct ConflictOnceAssignments {
    pub(super) inner: MemoryAssignmentRepository,
    tripped: AtomicBool,
}

impl AssignmentRepository for ConflictOnceAssignments {
    fn insert(&self, assignment: Assignment) -> Result<Assignment, RepositoryError> {
        self.inner.insert(assignment)
    }

    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        self.inner.find_by_lead(lead_id)
    }

    fn list_pending_older_than(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        self.inner.list_pending_older_than(max_age, now)
    }

    fn update_if_status(
        &self,
        updated: Assignment,
        expected: AssignmentStatus,
    ) -> Result<Assignment, RepositoryError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            return Err(RepositoryError::Conflict);
        }
        self.inner.update_if_status(updated, expected)
    }
}

/// Simulates losing a write race to another actor that rejected the
/// assignment: the first compare-and-set stores that rejection and reports a
/// conflict.
#[derive(Default)]
pub(super) struct RejectedRaceAssignments {
    pub(super) inner: MemoryAssignmentRepository,
    tripped: AtomicBool,
}

impl AssignmentRepository for RejectedRaceAssignments {
    fn insert(&self, assignment: Assignment) -> Result<Assignment, RepositoryError> {
        self.inner.insert(assignment)
    }

    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        self.inner.find_by_lead(lead_id)
    }

    fn list_pending_older_than(
        &self,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        self.inner.list_pending_older_than(max_age, now)
    }

    fn update_if_status(
        &self,
        updated: Assignment,
        expected: AssignmentStatus,
    ) -> Result<Assignment, RepositoryError> {
        if !self.tripped.swap(true, Ordering::SeqCst) {
            if let Some(mut current) = self.inner.get(&updated.id) {
                current.status = AssignmentStatus::Rejected;
                current.rejected_at = Some(Utc::now());
                current.rejection_reason = Some("raced".to_string());
                self.inner.put(current);
            }
            return Err(RepositoryError::Conflict);
        }
        self.inner.update_if_status(updated, expected)
    }
}

/// Backend that is flat-out offline.
pub(super) struct UnavailableAssignments;

impl AssignmentRepository for UnavailableAssignments {
    fn insert(&self, _assignment: Assignment) -> Result<Assignment, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn find_by_lead(&self, _lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn list_pending_older_than(
        &self,
        _max_age: Duration,
        _now: DateTime<Utc>,
    ) -> Result<Vec<Assignment>, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }

    fn update_if_status(
        &self,
        _updated: Assignment,
        _expected: AssignmentStatus,
    ) -> Result<Assignment, RepositoryError> {
        Err(RepositoryError::Unavailable("database offline".to_string()))
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
