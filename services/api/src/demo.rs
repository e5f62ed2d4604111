use crate::infra::{
    sample_agents, sample_leads, seed, InMemoryAgentRepository, InMemoryAssignmentRepository,
    InMemoryLeadRepository, RecordingAuditSink,
};
use clap::Args;
use leadflow::error::AppError;
use leadflow::ingest::{read_agents_from_path, read_leads_from_path};
use leadflow::routing::config::{RoutingConfig, RoutingConfigHandle};
use leadflow::routing::coordinator::{RouteOptions, RoutingCoordinator, RoutingDecision};
use leadflow::routing::domain::{AgentId, AssignmentOutcome, Lead, LeadId, RoutingError};
use leadflow::routing::repository::{LeadRepository, SequentialIds};
use leadflow::routing::router::RoutingApi;
use leadflow::routing::scoring::ScoringEngine;
use leadflow::routing::store::AssignmentStore;
use leadflow::routing::webhook::{WebhookEvent, WebhookReaction};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration as StdDuration;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Print the full audit trail at the end of the demo.
    #[arg(long)]
    pub(crate) show_audit: bool,
}

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// CSV file with the leads to score
    #[arg(long)]
    pub(crate) leads: PathBuf,
    /// CSV file with the agent roster
    #[arg(long)]
    pub(crate) agents: PathBuf,
    /// Score only this lead id instead of every lead in the file
    #[arg(long)]
    pub(crate) lead: Option<String>,
    /// How many ranked candidates to print per lead
    #[arg(long, default_value_t = 3)]
    pub(crate) top: usize,
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let ScoreArgs {
        leads,
        agents,
        lead,
        top,
    } = args;

    let leads = read_leads_from_path(leads)?;
    let agents = read_agents_from_path(agents)?;
    let active = agents.iter().filter(|agent| agent.is_active).count();

    let targets: Vec<Lead> = match lead {
        Some(id) => {
            let wanted = LeadId(id);
            match leads.iter().find(|candidate| candidate.id == wanted) {
                Some(found) => vec![found.clone()],
                None => return Err(AppError::Routing(RoutingError::LeadNotFound(wanted))),
            }
        }
        None => leads,
    };

    let config = RoutingConfig {
        max_agents_per_lead: top,
        ..RoutingConfig::default()
    };
    let engine = ScoringEngine::default();

    println!(
        "Scoring {} leads against {} agents ({} active)",
        targets.len(),
        agents.len(),
        active
    );

    for lead in &targets {
        let line = lead.insurance_type.as_deref().unwrap_or("unspecified");
        let quality = match lead.quality_score {
            Some(score) => format!("{score:.0}"),
            None => "n/a".to_string(),
        };
        println!("\nLead {} | {} | {} | quality {}", lead.id, line, lead.location, quality);

        let ranked = engine.rank(lead, &agents, &config);
        if ranked.is_empty() {
            println!("- No active agents to rank");
            continue;
        }
        for (position, candidate) in ranked.iter().enumerate() {
            println!(
                "- #{} {} ({}) confidence {:.4}",
                position + 1,
                candidate.agent.name,
                candidate.agent.id,
                candidate.confidence
            );
            for component in candidate.factors.components() {
                println!(
                    "  - {}: {:.2} x {:.2} = {:.3}",
                    component.factor.label(),
                    component.value,
                    component.weight,
                    component.weighted
                );
            }
        }
    }

    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { show_audit } = args;

    println!("Lead routing demo");

    let leads = Arc::new(InMemoryLeadRepository::default());
    let agents = Arc::new(InMemoryAgentRepository::default());
    let assignments = Arc::new(InMemoryAssignmentRepository::default());
    let audit = Arc::new(RecordingAuditSink::default());
    seed(&leads, &agents);

    let store = AssignmentStore::new(assignments, Arc::new(SequentialIds::default()));
    let coordinator = Arc::new(RoutingCoordinator::new(
        leads.clone(),
        agents.clone(),
        store,
        audit.clone(),
        RoutingConfigHandle::new(RoutingConfig::default()),
    ));
    let api = RoutingApi::new(coordinator, StdDuration::from_secs(900));

    let config = api.coordinator.current_config();
    println!("\nAgent pool");
    for agent in sample_agents() {
        let status = if agent.is_active { "active" } else { "inactive" };
        println!(
            "- {} | {} | {} | rating {:.1} | conversion {:.0}% | load {}/{} | {}",
            agent.name,
            agent.specializations.join("/"),
            agent.location,
            agent.rating,
            agent.conversion_rate * 100.0,
            agent.current_lead_count,
            agent.max_lead_capacity,
            status
        );
    }
    println!(
        "\nConfidence threshold {:.2} | candidate budget {} | response window {} min",
        config.min_confidence_threshold,
        config.max_agents_per_lead,
        config.notification_timeout_ms / 60_000
    );

    println!("\nRouting lead-5001 (auto, Des Moines IA, quality 88)");
    let first = match api
        .coordinator
        .route_lead(&LeadId("lead-5001".to_string()), RouteOptions::default())
    {
        Ok(decision) => decision,
        Err(err) => {
            println!("- Routing unavailable: {err}");
            return Ok(());
        }
    };
    render_decision(&first);

    println!("\nWebhook: agent.rejected with reason no_capacity");
    let reaction = match api.reactor.react(WebhookEvent::AgentRejected {
        assignment_id: first.assignment.id.clone(),
        reason: Some("no_capacity".to_string()),
    }) {
        Ok(reaction) => reaction,
        Err(err) => {
            println!("- Handoff failed: {err}");
            return Ok(());
        }
    };
    let replacement = match reaction {
        WebhookReaction::Rejected {
            closed,
            replacement: Some(replacement),
        } => {
            println!(
                "- {} closed as {} (reason {})",
                closed.id,
                closed.status.label(),
                closed.rejection_reason.as_deref().unwrap_or("none")
            );
            render_decision(&replacement);
            replacement
        }
        WebhookReaction::Rejected {
            closed,
            replacement: None,
        } => {
            println!(
                "- {} closed as {}, nobody else was eligible",
                closed.id,
                closed.status.label()
            );
            return Ok(());
        }
        _ => {
            println!("- Unexpected reaction to the rejection");
            return Ok(());
        }
    };

    println!("\nWebhook: agent.accepted");
    match api.reactor.react(WebhookEvent::AgentAccepted {
        assignment_id: replacement.assignment.id.clone(),
    }) {
        Ok(WebhookReaction::Accepted { assignment }) => println!(
            "- {} accepted by {}",
            assignment.id,
            agent_name(&assignment.agent_id)
        ),
        Ok(_) => {}
        Err(err) => {
            println!("- Acceptance failed: {err}");
            return Ok(());
        }
    }

    println!("\nOutcome: policy bound for $1250");
    match api.coordinator.record_outcome(
        &replacement.assignment.id,
        AssignmentOutcome::Converted {
            value: Some(1250.0),
        },
    ) {
        Ok(settled) => println!(
            "- {} settled as {} with value {:.0}",
            settled.id,
            settled.status.label(),
            settled.conversion_value.unwrap_or_default()
        ),
        Err(err) => {
            println!("- Settlement failed: {err}");
            return Ok(());
        }
    }

    println!("\nRouting lead-5002 (health, Des Moines IA, quality 74)");
    match api
        .coordinator
        .route_lead(&LeadId("lead-5002".to_string()), RouteOptions::default())
    {
        Ok(decision) => {
            render_decision(&decision);
            match api.reactor.react(WebhookEvent::AgentAccepted {
                assignment_id: decision.assignment.id.clone(),
            }) {
                Ok(WebhookReaction::Accepted { assignment }) => println!(
                    "- {} accepted by {}",
                    assignment.id,
                    agent_name(&assignment.agent_id)
                ),
                Ok(_) => {}
                Err(err) => println!("- Acceptance failed: {err}"),
            }
        }
        Err(err) => println!("- Routing failed: {err}"),
    }

    println!("\nRouting lead-5003 (auto, Dallas TX, quality 65)");
    match api
        .coordinator
        .route_lead(&LeadId("lead-5003".to_string()), RouteOptions::default())
    {
        Ok(decision) => render_decision(&decision),
        Err(err) => println!("- Routing failed: {err}"),
    }

    println!("\nNobody answers, so the sweeper steps in");
    match api.sweeper.sweep_once(Some(chrono::Duration::zero())) {
        Ok(summary) => println!(
            "- Examined {} | reassigned {} | unrouted {} | failures {}",
            summary.examined, summary.reassigned, summary.unrouted, summary.failures
        ),
        Err(err) => println!("- Sweep unavailable: {err}"),
    }
    match api
        .coordinator
        .assignments_for_lead(&LeadId("lead-5003".to_string()))
    {
        Ok(history) => {
            for assignment in history {
                println!(
                    "- {} -> {} | {} | confidence {:.4}",
                    assignment.id,
                    agent_name(&assignment.agent_id),
                    assignment.status.label(),
                    assignment.confidence
                );
            }
        }
        Err(err) => println!("- History unavailable: {err}"),
    }

    println!("\nBatch intake: lead-5004 plus an id nobody has seen");
    let report = api.coordinator.batch_route(&[
        LeadId("lead-5004".to_string()),
        LeadId("lead-9999".to_string()),
    ]);
    println!(
        "- {} requested | {} routed | {} failed",
        report.requested, report.routed, report.failed
    );
    for entry in &report.entries {
        match (&entry.agent_id, &entry.error) {
            (Some(agent_id), _) => println!(
                "  - {} -> {} (confidence {:.4})",
                entry.lead_id,
                agent_name(agent_id),
                entry.confidence.unwrap_or_default()
            ),
            (None, Some(error)) => println!("  - {} failed: {}", entry.lead_id, error),
            (None, None) => {}
        }
    }

    println!("\nLead pool after the demo");
    for lead in sample_leads() {
        match leads.fetch(&lead.id) {
            Ok(Some(current)) => println!("- {}: {}", current.id, current.status.label()),
            Ok(None) => {}
            Err(err) => println!("- {} unavailable: {err}", lead.id),
        }
    }

    match api.coordinator.assignment(&replacement.assignment.id) {
        Ok(settled) => match serde_json::to_string_pretty(&settled) {
            Ok(json) => println!("\nSettled assignment payload:\n{json}"),
            Err(err) => println!("\nSettled assignment payload unavailable: {err}"),
        },
        Err(err) => println!("\nAssignment lookup failed: {err}"),
    }

    if show_audit {
        println!("\nAudit trail");
        for event in audit.events() {
            let mut parts = Vec::new();
            if let Some(lead_id) = &event.lead_id {
                parts.push(format!("lead={lead_id}"));
            }
            if let Some(agent_id) = &event.agent_id {
                parts.push(format!("agent={agent_id}"));
            }
            if let Some(assignment_id) = &event.assignment_id {
                parts.push(format!("assignment={assignment_id}"));
            }
            for (key, value) in &event.details {
                parts.push(format!("{key}={value}"));
            }
            println!("- {} {}", event.kind.label(), parts.join(" "));
        }
    }

    Ok(())
}

fn render_decision(decision: &RoutingDecision) {
    println!(
        "- Assigned {} to {} with confidence {:.4}",
        decision.assignment.id,
        agent_name(&decision.assignment.agent_id),
        decision.assignment.confidence
    );
    println!(
        "- Response due by {}",
        decision.assignment.expires_at.format("%H:%M:%S UTC")
    );
    for component in decision.factors.components() {
        println!(
            "  - {}: {:.2} x {:.2} = {:.3}",
            component.factor.label(),
            component.value,
            component.weight,
            component.weighted
        );
    }
}

fn agent_name(id: &AgentId) -> String {
    sample_agents()
        .into_iter()
        .find(|agent| &agent.id == id)
        .map(|agent| agent.name)
        .unwrap_or_else(|| id.to_string())
}
