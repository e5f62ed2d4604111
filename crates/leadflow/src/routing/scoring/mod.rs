//! Weighted factor model turning a lead and a candidate pool into a ranked
//! list of agents with auditable per-factor scores.

mod rules;

use serde::Serialize;

use super::config::RoutingConfig;
use super::domain::{Agent, Lead};

const SPECIALIZATION_WEIGHT: f64 = 0.30;
const LOCATION_WEIGHT: f64 = 0.25;
const PERFORMANCE_WEIGHT: f64 = 0.20;
const WORKLOAD_WEIGHT: f64 = 0.20;
const QUALITY_WEIGHT: f64 = 0.05;

/// The five inputs to the composite confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringFactor {
    SpecializationMatch,
    LocationProximity,
    Performance,
    Workload,
    QualityAlignment,
}

impl ScoringFactor {
    pub const fn label(self) -> &'static str {
        match self {
            ScoringFactor::SpecializationMatch => "specialization_match",
            ScoringFactor::LocationProximity => "location_proximity",
            ScoringFactor::Performance => "performance",
            ScoringFactor::Workload => "workload",
            ScoringFactor::QualityAlignment => "quality_alignment",
        }
    }

    pub const fn weight(self) -> f64 {
        match self {
            ScoringFactor::SpecializationMatch => SPECIALIZATION_WEIGHT,
            ScoringFactor::LocationProximity => LOCATION_WEIGHT,
            ScoringFactor::Performance => PERFORMANCE_WEIGHT,
            ScoringFactor::Workload => WORKLOAD_WEIGHT,
            ScoringFactor::QualityAlignment => QUALITY_WEIGHT,
        }
    }
}

/// Raw factor values for one lead and agent pairing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FactorBreakdown {
    pub specialization_match: f64,
    pub location_proximity: f64,
    pub performance: f64,
    pub workload: f64,
    pub quality_alignment: f64,
}

impl FactorBreakdown {
    pub fn confidence(&self) -> f64 {
        SPECIALIZATION_WEIGHT * self.specialization_match
            + LOCATION_WEIGHT * self.location_proximity
            + PERFORMANCE_WEIGHT * self.performance
            + WORKLOAD_WEIGHT * self.workload
            + QUALITY_WEIGHT * self.quality_alignment
    }

    fn value(&self, factor: ScoringFactor) -> f64 {
        match factor {
            ScoringFactor::SpecializationMatch => self.specialization_match,
            ScoringFactor::LocationProximity => self.location_proximity,
            ScoringFactor::Performance => self.performance,
            ScoringFactor::Workload => self.workload,
            ScoringFactor::QualityAlignment => self.quality_alignment,
        }
    }

    /// Per-factor contributions in a shape suitable for audit trails and
    /// operator-facing explanations.
    pub fn components(&self) -> Vec<ScoreComponent> {
        [
            ScoringFactor::SpecializationMatch,
            ScoringFactor::LocationProximity,
            ScoringFactor::Performance,
            ScoringFactor::Workload,
            ScoringFactor::QualityAlignment,
        ]
        .into_iter()
        .map(|factor| {
            let value = self.value(factor);
            ScoreComponent {
                factor,
                value,
                weight: factor.weight(),
                weighted: factor.weight() * value,
            }
        })
        .collect()
    }
}

/// One factor's contribution to a composite confidence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreComponent {
    pub factor: ScoringFactor,
    pub value: f64,
    pub weight: f64,
    pub weighted: f64,
}

/// An agent together with the score it earned for a particular lead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub agent: Agent,
    pub factors: FactorBreakdown,
    pub confidence: f64,
}

/// Stateless ranking engine. Scoring is pure: the same lead, pool, and config
/// always produce the same ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringEngine;

impl ScoringEngine {
    /// Scores every active candidate and returns them best first, cut to the
    /// configured candidate budget. Inactive agents never appear; an empty
    /// pool yields an empty list.
    pub fn rank(
        &self,
        lead: &Lead,
        candidates: &[Agent],
        config: &RoutingConfig,
    ) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .filter(|agent| agent.is_active)
            .map(|agent| self.score_one(lead, agent.clone()))
            .collect();

        scored.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| {
                    if config.load_balancing_enabled {
                        a.agent.current_lead_count.cmp(&b.agent.current_lead_count)
                    } else {
                        std::cmp::Ordering::Equal
                    }
                })
                .then_with(|| a.agent.id.cmp(&b.agent.id))
        });
        scored.truncate(config.max_agents_per_lead);
        scored
    }

    /// Scores a single pairing without filtering or thresholds.
    pub fn score_one(&self, lead: &Lead, agent: Agent) -> ScoredCandidate {
        let factors = FactorBreakdown {
            specialization_match: rules::specialization_match(lead, &agent),
            location_proximity: rules::location_proximity(&lead.location, &agent.location),
            performance: rules::performance(&agent),
            workload: rules::workload(&agent),
            quality_alignment: rules::quality_alignment(lead, &agent),
        };
        let confidence = factors.confidence();
        ScoredCandidate {
            agent,
            factors,
            confidence,
        }
    }
}
