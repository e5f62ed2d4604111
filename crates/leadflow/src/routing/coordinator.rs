use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::warn;

use super::config::{RoutingConfig, RoutingConfigHandle};
use super::domain::{
    AgentId, Assignment, AssignmentId, AssignmentOutcome, AssignmentStatus, LeadId, LeadStatus,
    RoutingError,
};
use super::repository::{
    AgentRepository, AssignmentRepository, AuditEvent, AuditKind, AuditSink, LeadRepository,
};
use super::scoring::{FactorBreakdown, ScoredCandidate, ScoringEngine};
use super::store::{AssignmentStore, TransitionMetadata};

/// Two scores closer than this count as tied for round-robin purposes.
const CONFIDENCE_TIE_EPSILON: f64 = 1e-9;

/// Caller-supplied knobs for a single routing call.
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Route to this agent directly, bypassing the confidence threshold.
    pub agent: Option<AgentId>,
    /// Agents that must not receive the lead.
    pub exclude: Vec<AgentId>,
    /// Cancel an existing open assignment instead of failing on it.
    pub reassign: bool,
    pub notes: Option<String>,
}

/// Why an open assignment is being closed out and re-routed.
#[derive(Debug, Clone)]
pub enum ReassignDisposition {
    /// The agent never responded within the notification window.
    Expired,
    /// The agent turned the lead down.
    Rejected { reason: Option<String> },
}

/// The result of routing a lead: the stored assignment plus the factor values
/// that justified the pick.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub assignment: Assignment,
    pub factors: FactorBreakdown,
}

/// What a reassignment did: the closed-out assignment and, when an alternative
/// agent existed, the replacement decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReassignOutcome {
    pub closed: Assignment,
    pub replacement: Option<RoutingDecision>,
}

/// Per-lead result inside a batch routing report.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    pub lead_id: LeadId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<AssignmentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a batch routing call. Failures stay per-lead; one bad lead never
/// rolls back the rest.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub requested: usize,
    pub routed: usize,
    pub failed: usize,
    pub entries: Vec<BatchEntry>,
}

/// Orchestrates scoring, assignment state, workload counters, and lead status
/// into the routing operations the rest of the system calls.
pub struct RoutingCoordinator<L, A, S, D> {
    leads: Arc<L>,
    agents: Arc<A>,
    store: AssignmentStore<S>,
    audit: Arc<D>,
    config: RoutingConfigHandle,
    scoring: ScoringEngine,
    rotation: AtomicUsize,
}

impl<L, A, S, D> RoutingCoordinator<L, A, S, D>
where
    L: LeadRepository,
    A: AgentRepository,
    S: AssignmentRepository,
    D: AuditSink,
{
    pub fn new(
        leads: Arc<L>,
        agents: Arc<A>,
        store: AssignmentStore<S>,
        audit: Arc<D>,
        config: RoutingConfigHandle,
    ) -> Self {
        Self {
            leads,
            agents,
            store,
            audit,
            config,
            scoring: ScoringEngine,
            rotation: AtomicUsize::new(0),
        }
    }

    /// Scores the active pool for a lead and opens a `Pending` assignment to
    /// the winner.
    ///
    /// Fails with `AlreadyRouted` when the lead still has an open assignment,
    /// unless `options.reassign` asks for it to be cancelled first. A manual
    /// `options.agent` target skips the confidence threshold but must still be
    /// an active agent.
    pub fn route_lead(
        &self,
        lead_id: &LeadId,
        options: RouteOptions,
    ) -> Result<RoutingDecision, RoutingError> {
        let config = self.config.snapshot();
        let now = Utc::now();
        let lead = self
            .leads
            .fetch(lead_id)?
            .ok_or_else(|| RoutingError::LeadNotFound(lead_id.clone()))?;

        if let Some(existing) = self.store.settleable_for_lead(lead_id)? {
            if !options.reassign {
                return Err(RoutingError::AlreadyRouted {
                    lead_id: lead_id.clone(),
                    assignment_id: existing.id,
                });
            }
            let cancelled = self.store.transition(
                &existing.id,
                AssignmentStatus::Cancelled,
                TransitionMetadata::default(),
                now,
            )?;
            self.agents.adjust_workload(&cancelled.agent_id, -1)?;
            let mut event = AuditEvent::new(AuditKind::StatusChanged, now);
            event.lead_id = Some(lead_id.clone());
            event.agent_id = Some(cancelled.agent_id.clone());
            event.assignment_id = Some(cancelled.id.clone());
            event
                .details
                .insert("status".to_string(), AssignmentStatus::Cancelled.label().to_string());
            event
                .details
                .insert("cause".to_string(), "superseded".to_string());
            self.emit(event);
        }

        let candidate = match &options.agent {
            Some(agent_id) => {
                let agent = self
                    .agents
                    .fetch(agent_id)?
                    .filter(|a| a.is_active && !options.exclude.contains(&a.id))
                    .ok_or_else(|| RoutingError::AgentNotFound(agent_id.clone()))?;
                self.scoring.score_one(&lead, agent)
            }
            None => {
                let mut pool = self.agents.list_active()?;
                pool.retain(|agent| !options.exclude.contains(&agent.id));
                let mut ranked = self.scoring.rank(&lead, &pool, &config);
                if ranked.is_empty() {
                    return Err(RoutingError::NoEligibleAgent {
                        lead_id: lead_id.clone(),
                        best_confidence: None,
                    });
                }
                let chosen = ranked.swap_remove(self.pick_index(&ranked, &config));
                if chosen.confidence < config.min_confidence_threshold {
                    return Err(RoutingError::NoEligibleAgent {
                        lead_id: lead_id.clone(),
                        best_confidence: Some(chosen.confidence),
                    });
                }
                chosen
            }
        };

        let ScoredCandidate {
            agent,
            factors,
            confidence,
        } = candidate;
        let assignment = self.store.create(
            &lead,
            &agent,
            confidence,
            options.notes.clone(),
            now,
            config.notification_timeout(),
        )?;
        self.agents.adjust_workload(&agent.id, 1)?;
        self.leads.update_status(lead_id, LeadStatus::Routed, now)?;

        let mut event = AuditEvent::new(AuditKind::Assigned, now);
        event.lead_id = Some(lead_id.clone());
        event.agent_id = Some(agent.id.clone());
        event.assignment_id = Some(assignment.id.clone());
        event
            .details
            .insert("confidence".to_string(), format!("{confidence:.4}"));
        self.emit(event);

        Ok(RoutingDecision { assignment, factors })
    }

    /// Closes out an open assignment and routes the lead to someone else.
    ///
    /// The previous agent is always excluded from the new pool. When nobody
    /// else qualifies the lead drops back to `qualified` and the outcome
    /// reports no replacement rather than failing. A disposition that was
    /// already applied is acknowledged without changing anything again.
    pub fn reassign(
        &self,
        assignment_id: &AssignmentId,
        disposition: ReassignDisposition,
        exclude: &[AgentId],
    ) -> Result<ReassignOutcome, RoutingError> {
        let now = Utc::now();
        let current = self.store.get(assignment_id)?;

        let (target, reason) = match disposition {
            ReassignDisposition::Expired => (AssignmentStatus::Expired, None),
            ReassignDisposition::Rejected { reason } => (AssignmentStatus::Rejected, reason),
        };
        if current.status == target {
            // Duplicate delivery: the earlier one already closed the
            // assignment and adjusted the pool.
            return Ok(ReassignOutcome {
                closed: current,
                replacement: None,
            });
        }
        let metadata = TransitionMetadata {
            rejection_reason: reason.clone(),
            ..TransitionMetadata::default()
        };
        let closed = self
            .store
            .transition(assignment_id, target, metadata, now)?;
        self.agents.adjust_workload(&closed.agent_id, -1)?;

        let mut exclusions = exclude.to_vec();
        if !exclusions.contains(&closed.agent_id) {
            exclusions.push(closed.agent_id.clone());
        }
        let notes = match (target, &reason) {
            (AssignmentStatus::Rejected, Some(reason)) => {
                format!("reassigned after rejection: {reason}")
            }
            (AssignmentStatus::Rejected, None) => "reassigned after rejection".to_string(),
            _ => "reassigned after expiry".to_string(),
        };
        let options = RouteOptions {
            exclude: exclusions,
            notes: Some(notes),
            ..RouteOptions::default()
        };

        match self.route_lead(&closed.lead_id, options) {
            Ok(decision) => {
                let mut event = AuditEvent::new(AuditKind::Reassigned, now);
                event.lead_id = Some(closed.lead_id.clone());
                event.agent_id = Some(decision.assignment.agent_id.clone());
                event.assignment_id = Some(decision.assignment.id.clone());
                event
                    .details
                    .insert("previous_agent".to_string(), closed.agent_id.0.clone());
                event
                    .details
                    .insert("disposition".to_string(), target.label().to_string());
                self.emit(event);
                Ok(ReassignOutcome {
                    closed,
                    replacement: Some(decision),
                })
            }
            Err(RoutingError::NoEligibleAgent { .. }) => {
                self.leads
                    .update_status(&closed.lead_id, LeadStatus::Qualified, now)?;
                let mut event = AuditEvent::new(AuditKind::Reassigned, now);
                event.lead_id = Some(closed.lead_id.clone());
                event.assignment_id = Some(closed.id.clone());
                event
                    .details
                    .insert("previous_agent".to_string(), closed.agent_id.0.clone());
                event
                    .details
                    .insert("disposition".to_string(), target.label().to_string());
                event
                    .details
                    .insert("replacement".to_string(), "none".to_string());
                self.emit(event);
                Ok(ReassignOutcome {
                    closed,
                    replacement: None,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Routes a batch of leads, one decision per lead, partial failure allowed.
    pub fn batch_route(&self, lead_ids: &[LeadId]) -> BatchReport {
        let mut entries = Vec::with_capacity(lead_ids.len());
        let mut routed = 0;
        let mut failed = 0;
        for lead_id in lead_ids {
            match self.route_lead(lead_id, RouteOptions::default()) {
                Ok(decision) => {
                    routed += 1;
                    entries.push(BatchEntry {
                        lead_id: lead_id.clone(),
                        assignment_id: Some(decision.assignment.id),
                        agent_id: Some(decision.assignment.agent_id),
                        confidence: Some(decision.assignment.confidence),
                        error: None,
                    });
                }
                Err(err) => {
                    failed += 1;
                    entries.push(BatchEntry {
                        lead_id: lead_id.clone(),
                        assignment_id: None,
                        agent_id: None,
                        confidence: None,
                        error: Some(err.to_string()),
                    });
                }
            }
        }
        BatchReport {
            requested: lead_ids.len(),
            routed,
            failed,
            entries,
        }
    }

    /// Marks a pending assignment as taken up by its agent.
    pub fn accept(&self, assignment_id: &AssignmentId) -> Result<Assignment, RoutingError> {
        let now = Utc::now();
        let updated = self.store.transition(
            assignment_id,
            AssignmentStatus::Accepted,
            TransitionMetadata::default(),
            now,
        )?;
        let mut event = AuditEvent::new(AuditKind::StatusChanged, now);
        event.lead_id = Some(updated.lead_id.clone());
        event.agent_id = Some(updated.agent_id.clone());
        event.assignment_id = Some(updated.id.clone());
        event
            .details
            .insert("status".to_string(), updated.status.label().to_string());
        self.emit(event);
        Ok(updated)
    }

    /// Settles an accepted assignment as completed or converted. Conversion
    /// also promotes the lead itself.
    pub fn record_outcome(
        &self,
        assignment_id: &AssignmentId,
        outcome: AssignmentOutcome,
    ) -> Result<Assignment, RoutingError> {
        let now = Utc::now();
        let (target, metadata) = match outcome {
            AssignmentOutcome::Completed => {
                (AssignmentStatus::Completed, TransitionMetadata::default())
            }
            AssignmentOutcome::Converted { value } => (
                AssignmentStatus::Converted,
                TransitionMetadata {
                    conversion_value: value,
                    ..TransitionMetadata::default()
                },
            ),
        };
        let updated = self.store.transition(assignment_id, target, metadata, now)?;
        self.agents.adjust_workload(&updated.agent_id, -1)?;
        if target == AssignmentStatus::Converted {
            self.leads
                .update_status(&updated.lead_id, LeadStatus::Converted, now)?;
        }

        let mut event = AuditEvent::new(AuditKind::OutcomeRecorded, now);
        event.lead_id = Some(updated.lead_id.clone());
        event.agent_id = Some(updated.agent_id.clone());
        event.assignment_id = Some(updated.id.clone());
        event
            .details
            .insert("outcome".to_string(), target.label().to_string());
        if let Some(value) = updated.conversion_value {
            event
                .details
                .insert("conversion_value".to_string(), format!("{value:.2}"));
        }
        self.emit(event);
        Ok(updated)
    }

    /// Withdraws a pending assignment and returns the lead to the qualified
    /// pool.
    pub fn cancel(&self, assignment_id: &AssignmentId) -> Result<Assignment, RoutingError> {
        let now = Utc::now();
        let updated = self.store.transition(
            assignment_id,
            AssignmentStatus::Cancelled,
            TransitionMetadata::default(),
            now,
        )?;
        self.agents.adjust_workload(&updated.agent_id, -1)?;
        self.leads
            .update_status(&updated.lead_id, LeadStatus::Qualified, now)?;

        let mut event = AuditEvent::new(AuditKind::StatusChanged, now);
        event.lead_id = Some(updated.lead_id.clone());
        event.agent_id = Some(updated.agent_id.clone());
        event.assignment_id = Some(updated.id.clone());
        event
            .details
            .insert("status".to_string(), updated.status.label().to_string());
        self.emit(event);
        Ok(updated)
    }

    pub fn assignment(&self, id: &AssignmentId) -> Result<Assignment, RoutingError> {
        self.store.get(id)
    }

    pub fn assignments_for_lead(&self, lead_id: &LeadId) -> Result<Vec<Assignment>, RoutingError> {
        self.store.find_by_lead(lead_id)
    }

    /// Pending assignments older than `max_age`, falling back to the
    /// configured notification timeout when no override is given.
    pub fn stale_assignments(
        &self,
        max_age: Option<Duration>,
    ) -> Result<Vec<Assignment>, RoutingError> {
        let config = self.config.snapshot();
        let max_age = max_age.unwrap_or_else(|| config.notification_timeout());
        self.store.list_pending_older_than(max_age, Utc::now())
    }

    pub fn current_config(&self) -> RoutingConfig {
        self.config.snapshot()
    }

    /// Validates and applies a new routing configuration. In-flight operations
    /// keep the snapshot they started with.
    pub fn update_config(&self, next: RoutingConfig) -> Result<RoutingConfig, RoutingError> {
        let applied = self.config.replace(next)?;
        let now = Utc::now();
        let mut event = AuditEvent::new(AuditKind::ConfigUpdated, now);
        event.details.insert(
            "min_confidence_threshold".to_string(),
            format!("{:.4}", applied.min_confidence_threshold),
        );
        event.details.insert(
            "max_agents_per_lead".to_string(),
            applied.max_agents_per_lead.to_string(),
        );
        event.details.insert(
            "notification_timeout_ms".to_string(),
            applied.notification_timeout_ms.to_string(),
        );
        event.details.insert(
            "round_robin_enabled".to_string(),
            applied.round_robin_enabled.to_string(),
        );
        event.details.insert(
            "load_balancing_enabled".to_string(),
            applied.load_balancing_enabled.to_string(),
        );
        self.emit(event);
        Ok(applied)
    }

    pub(crate) fn note_ignored_event(&self, event_name: &str) {
        let mut event = AuditEvent::new(AuditKind::WebhookIgnored, Utc::now());
        event
            .details
            .insert("event".to_string(), event_name.to_string());
        self.emit(event);
    }

    /// Index of the winning candidate. With round robin enabled, rotates among
    /// the candidates tied at the top score.
    fn pick_index(&self, ranked: &[ScoredCandidate], config: &RoutingConfig) -> usize {
        if !config.round_robin_enabled || ranked.len() < 2 {
            return 0;
        }
        let top = ranked[0].confidence;
        let tied = ranked
            .iter()
            .take_while(|c| (top - c.confidence).abs() < CONFIDENCE_TIE_EPSILON)
            .count();
        if tied < 2 {
            return 0;
        }
        self.rotation.fetch_add(1, Ordering::Relaxed) % tied
    }

    fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.record(event) {
            warn!(error = %err, "audit sink rejected event");
        }
    }
}
