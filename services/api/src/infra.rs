use chrono::{DateTime, Duration, Utc};
use leadflow::routing::domain::{
    Agent, AgentId, Assignment, AssignmentId, AssignmentStatus, Lead, LeadId, LeadStatus, Location,
};
use leadflow::routing::repository::{
    AgentRepository, AssignmentRepository, AuditError, AuditEvent, AuditSink, LeadRepository,
    RepositoryError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryLeadRepository {
    leads: Arc<Mutex<HashMap<LeadId, Lead>>>,
}

impl InMemoryLeadRepository {
    pub(crate) fn insert(&self, lead: Lead) {
        self.leads
            .lock()
            .expect("lead repository mutex poisoned")
            .insert(lead.id.clone(), lead);
    }
}

impl LeadRepository for InMemoryLeadRepository {
    fn fetch(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let guard = self.leads.lock().expect("lead repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn update_status(
        &self,
        id: &LeadId,
        status: LeadStatus,
        at: DateTime<Utc>,
    ) -> Result<Lead, RepositoryError> {
        let mut guard = self.leads.lock().expect("lead repository mutex poisoned");
        let lead = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        lead.status = status;
        lead.updated_at = at;
        Ok(lead.clone())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAgentRepository {
    agents: Arc<Mutex<HashMap<AgentId, Agent>>>,
}

impl InMemoryAgentRepository {
    pub(crate) fn insert(&self, agent: Agent) {
        self.agents
            .lock()
            .expect("agent repository mutex poisoned")
            .insert(agent.id.clone(), agent);
    }
}

impl AgentRepository for InMemoryAgentRepository {
    fn fetch(&self, id: &AgentId) -> Result<Option<Agent>, RepositoryError> {
        let guard = self.agents.lock().expect("agent repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn list_active(&self) -> Result<Vec<Agent>, RepositoryError> {
        let guard = self.agents.lock().expect("agent repository mutex poisoned");
        let mut active: Vec<Agent> = guard.values().filter(|a| a.is_active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(active)
    }

    fn adjust_workload(&self, id: &AgentId, delta: i32) -> Result<Agent, RepositoryError> {
        let mut guard = self.agents.lock().expect("agent repository mutex poisoned");
        let agent = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        agent.current_lead_count = agent.current_lead_count.saturating_add_signed(delta);
        Ok(agent.clone())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryAssignmentRepository {
    assignments: Arc<Mutex<HashMap<AssignmentId, Assignment>>>,
}

impl AssignmentRepository for InMemoryAssignmentRepository {
    fn insert(&self, assignment: Assignment) -> Result<Assignment, RepositoryError> {
        let mut guard = self
            .assignments
            .lock()
            .expect("assignment repository mutex poisoned");
        if guard.contains_key(&assignment.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(assignment.id.clone(), assignment.clone());
        Ok(assignment)
    }

    fn fetch(&self, id: &AssignmentId) -> Result<Option<Assignment>, RepositoryError> {
        let guard = self
            .assignments
            .lock()
            .expect("assignment repository mutex poisoned");
        Ok(guard.get(id).cloned())
    }

    fn find_by_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RepositoryError> {
        let guard = self
            .assignments
            .lock()
            .expect("assignment repository mutex poisoned");
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
        let guard = self
            .assignments
            .lock()
            .expect("assignment repository mutex poisoned");
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
        let mut guard = self
            .assignments
            .lock()
            .expect("assignment repository mutex poisoned");
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
pub(crate) struct RecordingAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl RecordingAuditSink {
    pub(crate) fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit sink mutex poisoned").clone()
    }
}

impl AuditSink for RecordingAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .expect("audit sink mutex poisoned")
            .push(event);
        Ok(())
    }
}

pub(crate) fn sample_leads() -> Vec<Lead> {
    let now = Utc::now();
    vec![
        Lead {
            id: LeadId("lead-5001".to_string()),
            insurance_type: Some("auto".to_string()),
            location: Location::new("IA", "Des Moines"),
            quality_score: Some(88.0),
            status: LeadStatus::Qualified,
            updated_at: now,
        },
        Lead {
            id: LeadId("lead-5002".to_string()),
            insurance_type: Some("health".to_string()),
            location: Location::new("IA", "Des Moines"),
            quality_score: Some(74.0),
            status: LeadStatus::Qualified,
            updated_at: now,
        },
        Lead {
            id: LeadId("lead-5003".to_string()),
            insurance_type: Some("auto".to_string()),
            location: Location::new("TX", "Dallas"),
            quality_score: Some(65.0),
            status: LeadStatus::Qualified,
            updated_at: now,
        },
        Lead {
            id: LeadId("lead-5004".to_string()),
            insurance_type: Some("life".to_string()),
            location: Location::new("IA", "Ames"),
            quality_score: Some(55.0),
            status: LeadStatus::Qualified,
            updated_at: now,
        },
    ]
}

pub(crate) fn sample_agents() -> Vec<Agent> {
    vec![
        Agent {
            id: AgentId("agent-ava".to_string()),
            name: "Ava Reyes".to_string(),
            specializations: vec!["auto".to_string(), "home".to_string()],
            location: Location::new("IA", "Des Moines"),
            is_active: true,
            rating: 4.8,
            conversion_rate: 0.42,
            current_lead_count: 3,
            max_lead_capacity: 12,
        },
        Agent {
            id: AgentId("agent-ben".to_string()),
            name: "Ben Okafor".to_string(),
            specializations: vec!["auto".to_string()],
            location: Location::new("IA", "Cedar Rapids"),
            is_active: true,
            rating: 4.6,
            conversion_rate: 0.36,
            current_lead_count: 1,
            max_lead_capacity: 8,
        },
        Agent {
            id: AgentId("agent-carla".to_string()),
            name: "Carla Nguyen".to_string(),
            specializations: vec!["home".to_string(), "life".to_string()],
            location: Location::new("TX", "Austin"),
            is_active: true,
            rating: 4.2,
            conversion_rate: 0.31,
            current_lead_count: 2,
            max_lead_capacity: 10,
        },
        Agent {
            id: AgentId("agent-drew".to_string()),
            name: "Drew Patel".to_string(),
            specializations: vec!["health".to_string()],
            location: Location::new("IA", "Des Moines"),
            is_active: true,
            rating: 3.9,
            conversion_rate: 0.22,
            current_lead_count: 0,
            max_lead_capacity: 6,
        },
        Agent {
            id: AgentId("agent-elena".to_string()),
            name: "Elena Sosa".to_string(),
            specializations: vec!["auto".to_string()],
            location: Location::new("TX", "Dallas"),
            is_active: true,
            rating: 4.9,
            conversion_rate: 0.45,
            current_lead_count: 7,
            max_lead_capacity: 7,
        },
        Agent {
            id: AgentId("agent-felix".to_string()),
            name: "Felix Grant".to_string(),
            specializations: vec!["life".to_string()],
            location: Location::new("NV", "Reno"),
            is_active: false,
            rating: 4.4,
            conversion_rate: 0.33,
            current_lead_count: 0,
            max_lead_capacity: 9,
        },
    ]
}

pub(crate) fn seed(leads: &InMemoryLeadRepository, agents: &InMemoryAgentRepository) {
    for lead in sample_leads() {
        leads.insert(lead);
    }
    for agent in sample_agents() {
        agents.insert(agent);
    }
}
