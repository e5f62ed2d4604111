use std::sync::Arc;

use chrono::Duration;

use super::common::{
    auto_agent, auto_lead, build_coordinator, routing_config, FailingAuditSink,
    MemoryAgentRepository, MemoryAuditSink, MemoryLeadRepository, UnavailableAssignments,
};
use crate::routing::config::RoutingConfigHandle;
use crate::routing::coordinator::{ReassignDisposition, RouteOptions, RoutingCoordinator};
use crate::routing::domain::{
    AgentId, AssignmentId, AssignmentOutcome, AssignmentStatus, LeadId, LeadStatus, RoutingError,
};
use crate::routing::repository::{AuditKind, RepositoryError, SequentialIds};
use crate::routing::store::AssignmentStore;

const EPSILON: f64 = 1e-9;

#[test]
fn route_assigns_the_best_scoring_agent() {
    let (coordinator, leads, agents, _assignments, audit) = build_coordinator(routing_config());
    let mut lead = auto_lead("best");
    lead.quality_score = Some(90.0);
    leads.insert(lead.clone());

    let mut specialist = auto_agent("first");
    specialist.rating = 4.8;
    specialist.conversion_rate = 0.35;
    let mut generalist = auto_agent("second");
    generalist.specializations = vec!["home".to_string()];
    generalist.rating = 4.8;
    generalist.conversion_rate = 0.35;
    agents.insert(specialist.clone());
    agents.insert(generalist.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("lead routed");

    assert_eq!(decision.assignment.agent_id, specialist.id);
    assert_eq!(decision.assignment.status, AssignmentStatus::Pending);
    let expected = 0.30 * 1.0
        + 0.25 * 1.0
        + 0.20 * (0.4 * (4.8 / 5.0) + 0.6 * 0.35)
        + 0.20 * 0.8
        + 0.05 * 1.0;
    assert!((decision.assignment.confidence - expected).abs() < EPSILON);
    assert_eq!(
        decision.assignment.expires_at - decision.assignment.assigned_at,
        Duration::minutes(15)
    );

    let routed = leads.get(&lead.id).expect("lead present");
    assert_eq!(routed.status, LeadStatus::Routed);
    let loaded = agents.get(&specialist.id).expect("agent present");
    assert_eq!(loaded.current_lead_count, 3);
    assert!(audit.kinds().contains(&AuditKind::Assigned));
}

#[test]
fn route_refuses_low_confidence_pools() {
    let mut config = routing_config();
    config.min_confidence_threshold = 0.95;
    let (coordinator, leads, agents, assignments, _audit) = build_coordinator(config);
    let lead = auto_lead("low");
    leads.insert(lead.clone());
    agents.insert(auto_agent("weak"));

    let err = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect_err("below threshold");
    match err {
        RoutingError::NoEligibleAgent {
            lead_id,
            best_confidence,
        } => {
            assert_eq!(lead_id, lead.id);
            let best = best_confidence.expect("pool scored");
            assert!((best - 0.84).abs() < EPSILON);
        }
        other => panic!("expected no eligible agent, got {other:?}"),
    }

    // The lead and the pool stay untouched.
    assert_eq!(leads.get(&lead.id).expect("lead").status, LeadStatus::Qualified);
    assert_eq!(
        agents
            .get(&AgentId("agent-weak".to_string()))
            .expect("agent")
            .current_lead_count,
        2
    );
    assert!(assignments
        .get(&AssignmentId("asg-000001".to_string()))
        .is_none());
}

#[test]
fn route_fails_when_nobody_is_active() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("inactive");
    leads.insert(lead.clone());
    let mut dormant = auto_agent("dormant");
    dormant.is_active = false;
    agents.insert(dormant);

    let err = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect_err("no active agents");
    match err {
        RoutingError::NoEligibleAgent {
            best_confidence, ..
        } => assert!(best_confidence.is_none()),
        other => panic!("expected no eligible agent, got {other:?}"),
    }
}

#[test]
fn route_requires_a_known_lead() {
    let (coordinator, _leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    agents.insert(auto_agent("ready"));

    let err = coordinator
        .route_lead(&LeadId("lead-ghost".to_string()), RouteOptions::default())
        .expect_err("unknown lead");
    assert!(matches!(err, RoutingError::LeadNotFound(_)));
}

#[test]
fn route_is_exclusive_while_an_assignment_is_open() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("exclusive");
    leads.insert(lead.clone());
    agents.insert(auto_agent("only"));

    let first = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("first route");
    let err = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect_err("second route blocked");
    match err {
        RoutingError::AlreadyRouted {
            lead_id,
            assignment_id,
        } => {
            assert_eq!(lead_id, lead.id);
            assert_eq!(assignment_id, first.assignment.id);
        }
        other => panic!("expected already routed, got {other:?}"),
    }
}

#[test]
fn explicit_reassign_supersedes_the_open_assignment() {
    let (coordinator, leads, agents, assignments, audit) = build_coordinator(routing_config());
    let lead = auto_lead("supersede");
    leads.insert(lead.clone());
    let agent = auto_agent("steady");
    agents.insert(agent.clone());

    let first = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("first route");
    let second = coordinator
        .route_lead(
            &lead.id,
            RouteOptions {
                reassign: true,
                ..RouteOptions::default()
            },
        )
        .expect("superseding route");

    assert_ne!(first.assignment.id, second.assignment.id);
    let old = assignments.get(&first.assignment.id).expect("old kept");
    assert_eq!(old.status, AssignmentStatus::Cancelled);
    assert_eq!(second.assignment.status, AssignmentStatus::Pending);
    // One increment survived: +1, -1 on cancel, +1 again.
    assert_eq!(agents.get(&agent.id).expect("agent").current_lead_count, 3);
    assert!(audit.kinds().contains(&AuditKind::StatusChanged));
}

#[test]
fn manual_target_bypasses_the_threshold() {
    let mut config = routing_config();
    config.min_confidence_threshold = 0.99;
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(config);
    let lead = auto_lead("manual");
    leads.insert(lead.clone());
    let agent = auto_agent("picked");
    agents.insert(agent.clone());

    let decision = coordinator
        .route_lead(
            &lead.id,
            RouteOptions {
                agent: Some(agent.id.clone()),
                ..RouteOptions::default()
            },
        )
        .expect("manual route");
    assert_eq!(decision.assignment.agent_id, agent.id);
    assert!(decision.assignment.confidence < 0.99);
}

#[test]
fn manual_target_must_be_an_active_agent() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("strict");
    leads.insert(lead.clone());
    let mut dormant = auto_agent("dormant");
    dormant.is_active = false;
    agents.insert(dormant.clone());

    let err = coordinator
        .route_lead(
            &lead.id,
            RouteOptions {
                agent: Some(dormant.id.clone()),
                ..RouteOptions::default()
            },
        )
        .expect_err("inactive target refused");
    assert!(matches!(err, RoutingError::AgentNotFound(_)));

    let err = coordinator
        .route_lead(
            &lead.id,
            RouteOptions {
                agent: Some(AgentId("agent-ghost".to_string())),
                ..RouteOptions::default()
            },
        )
        .expect_err("unknown target refused");
    assert!(matches!(err, RoutingError::AgentNotFound(_)));
}

#[test]
fn reassign_excludes_the_previous_agent_and_carries_the_reason() {
    let (coordinator, leads, agents, assignments, audit) = build_coordinator(routing_config());
    let lead = auto_lead("handoff");
    leads.insert(lead.clone());
    let mut first_choice = auto_agent("alpha");
    first_choice.rating = 4.9;
    first_choice.conversion_rate = 0.40;
    let backup = auto_agent("bravo");
    agents.insert(first_choice.clone());
    agents.insert(backup.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    assert_eq!(decision.assignment.agent_id, first_choice.id);

    let outcome = coordinator
        .reassign(
            &decision.assignment.id,
            ReassignDisposition::Rejected {
                reason: Some("no_capacity".to_string()),
            },
            &[],
        )
        .expect("reassigned");

    assert_eq!(outcome.closed.status, AssignmentStatus::Rejected);
    assert_eq!(outcome.closed.rejection_reason.as_deref(), Some("no_capacity"));
    let replacement = outcome.replacement.expect("alternative found");
    assert_eq!(replacement.assignment.agent_id, backup.id);
    assert_eq!(
        replacement.assignment.notes.as_deref(),
        Some("reassigned after rejection: no_capacity")
    );

    let closed = assignments.get(&decision.assignment.id).expect("closed kept");
    assert_eq!(closed.status, AssignmentStatus::Rejected);
    assert_eq!(
        agents.get(&first_choice.id).expect("alpha").current_lead_count,
        2
    );
    assert_eq!(agents.get(&backup.id).expect("bravo").current_lead_count, 3);
    assert!(audit.kinds().contains(&AuditKind::Reassigned));
}

#[test]
fn reassign_without_alternatives_parks_the_lead() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("parked");
    leads.insert(lead.clone());
    let only = auto_agent("solo");
    agents.insert(only.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    let outcome = coordinator
        .reassign(&decision.assignment.id, ReassignDisposition::Expired, &[])
        .expect("reassign completes");

    assert_eq!(outcome.closed.status, AssignmentStatus::Expired);
    assert!(outcome.replacement.is_none());
    assert_eq!(leads.get(&lead.id).expect("lead").status, LeadStatus::Qualified);
    assert_eq!(agents.get(&only.id).expect("solo").current_lead_count, 2);
}

#[test]
fn reassign_tolerates_an_already_applied_disposition() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("twice");
    leads.insert(lead.clone());
    let only = auto_agent("lonely");
    agents.insert(only.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    let disposition = ReassignDisposition::Rejected {
        reason: Some("busy".to_string()),
    };
    coordinator
        .reassign(&decision.assignment.id, disposition.clone(), &[])
        .expect("first reassign");

    // A duplicate delivery of the same rejection acknowledges without
    // touching the workload counter a second time.
    let repeat = coordinator
        .reassign(&decision.assignment.id, disposition, &[])
        .expect("duplicate reassign tolerated");
    assert_eq!(repeat.closed.status, AssignmentStatus::Rejected);
    assert!(repeat.replacement.is_none());
    assert_eq!(agents.get(&only.id).expect("agent").current_lead_count, 2);
}

#[test]
fn converted_outcomes_promote_the_lead() {
    let (coordinator, leads, agents, _assignments, audit) = build_coordinator(routing_config());
    let lead = auto_lead("won");
    leads.insert(lead.clone());
    let agent = auto_agent("closer");
    agents.insert(agent.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    coordinator
        .accept(&decision.assignment.id)
        .expect("accepted");
    let settled = coordinator
        .record_outcome(
            &decision.assignment.id,
            AssignmentOutcome::Converted {
                value: Some(1250.0),
            },
        )
        .expect("converted");

    assert_eq!(settled.status, AssignmentStatus::Converted);
    assert_eq!(settled.conversion_value, Some(1250.0));
    assert_eq!(leads.get(&lead.id).expect("lead").status, LeadStatus::Converted);
    assert_eq!(agents.get(&agent.id).expect("agent").current_lead_count, 2);
    assert!(audit.kinds().contains(&AuditKind::OutcomeRecorded));
}

#[test]
fn outcomes_require_acceptance_first() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("early");
    leads.insert(lead.clone());
    agents.insert(auto_agent("early"));

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    let err = coordinator
        .record_outcome(&decision.assignment.id, AssignmentOutcome::Completed)
        .expect_err("pending cannot settle");
    assert!(matches!(err, RoutingError::InvalidTransition { .. }));
}

#[test]
fn cancel_returns_the_lead_to_the_pool() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let lead = auto_lead("recalled");
    leads.insert(lead.clone());
    let agent = auto_agent("recalled");
    agents.insert(agent.clone());

    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routed");
    let cancelled = coordinator
        .cancel(&decision.assignment.id)
        .expect("cancelled");

    assert_eq!(cancelled.status, AssignmentStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());
    assert_eq!(leads.get(&lead.id).expect("lead").status, LeadStatus::Qualified);
    assert_eq!(agents.get(&agent.id).expect("agent").current_lead_count, 2);
}

#[test]
fn batch_routing_reports_each_lead_separately() {
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(routing_config());
    let first = auto_lead("batch-1");
    let second = auto_lead("batch-2");
    leads.insert(first.clone());
    leads.insert(second.clone());
    agents.insert(auto_agent("pool"));

    let report = coordinator.batch_route(&[
        first.id.clone(),
        LeadId("lead-ghost".to_string()),
        second.id.clone(),
    ]);

    assert_eq!(report.requested, 3);
    assert_eq!(report.routed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.entries.len(), 3);
    assert!(report.entries[0].assignment_id.is_some());
    let failure = &report.entries[1];
    assert_eq!(failure.lead_id, LeadId("lead-ghost".to_string()));
    assert!(failure.error.as_deref().expect("error recorded").contains("not found"));
    assert!(report.entries[2].assignment_id.is_some());
}

#[test]
fn config_updates_are_validated_and_audited() {
    let (coordinator, _leads, _agents, _assignments, audit) = build_coordinator(routing_config());

    let mut invalid = routing_config();
    invalid.min_confidence_threshold = 1.5;
    let err = coordinator
        .update_config(invalid)
        .expect_err("invalid config rejected");
    assert!(matches!(err, RoutingError::ConfigValidation(_)));

    let mut next = routing_config();
    next.min_confidence_threshold = 0.7;
    next.round_robin_enabled = true;
    let applied = coordinator.update_config(next.clone()).expect("applied");
    assert_eq!(applied, next);
    assert_eq!(coordinator.current_config(), next);
    assert!(audit.kinds().contains(&AuditKind::ConfigUpdated));
}

#[test]
fn round_robin_rotates_among_tied_candidates() {
    let mut config = routing_config();
    config.round_robin_enabled = true;
    config.load_balancing_enabled = false;
    let (coordinator, leads, agents, _assignments, _audit) = build_coordinator(config);

    // Zero capacity keeps the workload factor at zero for both, so the tie
    // holds even as counters move.
    let mut first = auto_agent("rr-a");
    first.max_lead_capacity = 0;
    first.current_lead_count = 0;
    let mut second = auto_agent("rr-b");
    second.max_lead_capacity = 0;
    second.current_lead_count = 0;
    agents.insert(first.clone());
    agents.insert(second.clone());

    let mut assigned = Vec::new();
    for suffix in ["rr-1", "rr-2", "rr-3"] {
        let lead = auto_lead(suffix);
        leads.insert(lead.clone());
        let decision = coordinator
            .route_lead(&lead.id, RouteOptions::default())
            .expect("routed");
        assigned.push(decision.assignment.agent_id);
    }

    assert_eq!(assigned[0], first.id);
    assert_eq!(assigned[1], second.id);
    assert_eq!(assigned[2], first.id);
}

#[test]
fn audit_outages_never_block_routing() {
    let leads = Arc::new(MemoryLeadRepository::default());
    let agents = Arc::new(MemoryAgentRepository::default());
    let assignments = Arc::new(super::common::MemoryAssignmentRepository::default());
    let store = AssignmentStore::new(assignments, Arc::new(SequentialIds::default()));
    let coordinator = RoutingCoordinator::new(
        leads.clone(),
        agents.clone(),
        store,
        Arc::new(FailingAuditSink),
        RoutingConfigHandle::new(routing_config()),
    );

    let lead = auto_lead("quiet");
    leads.insert(lead.clone());
    agents.insert(auto_agent("quiet"));
    let decision = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect("routing unaffected by audit outage");
    assert_eq!(decision.assignment.status, AssignmentStatus::Pending);
}

#[test]
fn storage_outages_surface_as_repository_errors() {
    let leads = Arc::new(MemoryLeadRepository::default());
    let agents = Arc::new(MemoryAgentRepository::default());
    let store = AssignmentStore::new(
        Arc::new(UnavailableAssignments),
        Arc::new(SequentialIds::default()),
    );
    let coordinator = RoutingCoordinator::new(
        leads.clone(),
        agents.clone(),
        store,
        Arc::new(MemoryAuditSink::default()),
        RoutingConfigHandle::new(routing_config()),
    );

    let lead = auto_lead("outage");
    leads.insert(lead.clone());
    agents.insert(auto_agent("outage"));
    let err = coordinator
        .route_lead(&lead.id, RouteOptions::default())
        .expect_err("storage offline");
    assert!(matches!(
        err,
        RoutingError::Repository(RepositoryError::Unavailable(_))
    ));
}
