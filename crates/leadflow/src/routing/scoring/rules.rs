use crate::routing::domain::{Agent, Lead, Location};

fn norm_eq(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// 1.0 when the agent covers the declared line, 0.3 when it declares one the
/// agent lacks, 0.5 when the lead never declared a line.
pub(super) fn specialization_match(lead: &Lead, agent: &Agent) -> f64 {
    match lead
        .insurance_type
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        Some(declared) if agent.handles(declared) => 1.0,
        Some(_) => 0.3,
        None => 0.5,
    }
}

pub(super) fn location_proximity(lead: &Location, agent: &Location) -> f64 {
    let (Some(lead_state), Some(agent_state)) = (lead.state.as_deref(), agent.state.as_deref())
    else {
        return 0.5;
    };
    if !norm_eq(lead_state, agent_state) {
        return 0.3;
    }
    match (lead.city.as_deref(), agent.city.as_deref()) {
        (Some(lead_city), Some(agent_city)) if norm_eq(lead_city, agent_city) => 1.0,
        _ => 0.8,
    }
}

pub(super) fn performance(agent: &Agent) -> f64 {
    0.4 * (agent.rating / 5.0) + 0.6 * agent.conversion_rate
}

/// Remaining headroom as a fraction of capacity, floored at zero so an agent
/// over their cap never scores negative.
pub(super) fn workload(agent: &Agent) -> f64 {
    if agent.max_lead_capacity == 0 {
        return 0.0;
    }
    let used = f64::from(agent.current_lead_count) / f64::from(agent.max_lead_capacity);
    (1.0 - used).max(0.0)
}

/// High-quality leads are steered toward highly rated agents; mid and low
/// tiers stay close to neutral so the other factors dominate.
pub(super) fn quality_alignment(lead: &Lead, agent: &Agent) -> f64 {
    match lead.quality_score {
        Some(score) if score >= 80.0 => {
            if agent.rating >= 4.5 {
                1.0
            } else {
                0.6
            }
        }
        Some(score) if score >= 50.0 => 0.8,
        _ => 0.75,
    }
}
