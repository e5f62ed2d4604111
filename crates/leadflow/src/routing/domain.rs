use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repository::RepositoryError;

/// Identifier for a lead handed over by the qualification pipeline.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a sales agent eligible to receive leads.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for a single lead-to-agent assignment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssignmentId(pub String);

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pipeline state of a lead as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Received,
    Processing,
    Qualified,
    Routed,
    Converted,
    Rejected,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::Received => "received",
            LeadStatus::Processing => "processing",
            LeadStatus::Qualified => "qualified",
            LeadStatus::Routed => "routed",
            LeadStatus::Converted => "converted",
            LeadStatus::Rejected => "rejected",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "received" => Some(LeadStatus::Received),
            "processing" => Some(LeadStatus::Processing),
            "qualified" => Some(LeadStatus::Qualified),
            "routed" => Some(LeadStatus::Routed),
            "converted" => Some(LeadStatus::Converted),
            "rejected" => Some(LeadStatus::Rejected),
            _ => None,
        }
    }
}

/// Free-form state and city pair; either part may be missing on inbound data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub state: Option<String>,
    pub city: Option<String>,
}

impl Location {
    pub fn new(state: impl Into<String>, city: impl Into<String>) -> Self {
        Self {
            state: Some(state.into()),
            city: Some(city.into()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.city.as_deref(), self.state.as_deref()) {
            (Some(city), Some(state)) => write!(f, "{city}, {state}"),
            (Some(city), None) => f.write_str(city),
            (None, Some(state)) => f.write_str(state),
            (None, None) => f.write_str("unknown"),
        }
    }
}

/// The routing-relevant slice of a lead record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub insurance_type: Option<String>,
    pub location: Location,
    /// Upstream qualification score on a 0 to 100 scale, when available.
    pub quality_score: Option<f64>,
    pub status: LeadStatus,
    pub updated_at: DateTime<Utc>,
}

/// A sales agent as the routing engine sees one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub specializations: Vec<String>,
    pub location: Location,
    pub is_active: bool,
    /// Average review rating on a 0 to 5 scale.
    pub rating: f64,
    /// Historical share of assigned leads that converted, 0 to 1.
    pub conversion_rate: f64,
    pub current_lead_count: u32,
    pub max_lead_capacity: u32,
}

impl Agent {
    /// Whether the agent declares coverage for the given insurance line.
    pub fn handles(&self, insurance_type: &str) -> bool {
        self.specializations
            .iter()
            .any(|s| s.trim().eq_ignore_ascii_case(insurance_type.trim()))
    }
}

/// Lifecycle state of an assignment.
///
/// Legal transitions are `Pending` into any of the four closing states and
/// `Accepted` into `Completed` or `Converted`. Everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
    Cancelled,
    Completed,
    Converted,
}

impl AssignmentStatus {
    pub const fn label(self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Accepted => "accepted",
            AssignmentStatus::Rejected => "rejected",
            AssignmentStatus::Expired => "expired",
            AssignmentStatus::Cancelled => "cancelled",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Converted => "converted",
        }
    }

    /// True for states that can still move somewhere else.
    pub const fn is_settleable(self) -> bool {
        matches!(self, AssignmentStatus::Pending | AssignmentStatus::Accepted)
    }

    pub const fn is_terminal(self) -> bool {
        !self.is_settleable()
    }

    pub const fn can_transition_to(self, next: AssignmentStatus) -> bool {
        matches!(
            (self, next),
            (AssignmentStatus::Pending, AssignmentStatus::Accepted)
                | (AssignmentStatus::Pending, AssignmentStatus::Rejected)
                | (AssignmentStatus::Pending, AssignmentStatus::Expired)
                | (AssignmentStatus::Pending, AssignmentStatus::Cancelled)
                | (AssignmentStatus::Accepted, AssignmentStatus::Completed)
                | (AssignmentStatus::Accepted, AssignmentStatus::Converted)
        )
    }
}

/// How an accepted assignment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentOutcome {
    /// Work finished without a sale.
    Completed,
    /// The lead bought a policy, optionally with the premium value.
    Converted { value: Option<f64> },
}

/// One routing decision: a lead offered to an agent, with its full history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub status: AssignmentStatus,
    /// Composite confidence the scoring engine produced for this pairing.
    pub confidence: f64,
    pub assigned_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub notes: Option<String>,
    pub conversion_value: Option<f64>,
}

impl Assignment {
    pub fn pending(
        id: AssignmentId,
        lead_id: LeadId,
        agent_id: AgentId,
        confidence: f64,
        assigned_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Self {
        Self {
            id,
            lead_id,
            agent_id,
            status: AssignmentStatus::Pending,
            confidence,
            assigned_at,
            expires_at,
            accepted_at: None,
            rejected_at: None,
            expired_at: None,
            cancelled_at: None,
            completed_at: None,
            rejection_reason: None,
            notes,
            conversion_value: None,
        }
    }

    pub fn is_settleable(&self) -> bool {
        self.status.is_settleable()
    }
}

/// Everything that can go wrong while routing a lead.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("lead {0} not found")]
    LeadNotFound(LeadId),
    #[error("agent {0} not found or not active")]
    AgentNotFound(AgentId),
    #[error("assignment {0} not found")]
    AssignmentNotFound(AssignmentId),
    #[error("no eligible agent for lead {lead_id}")]
    NoEligibleAgent {
        lead_id: LeadId,
        /// Best confidence seen before the threshold cut, if any agent scored.
        best_confidence: Option<f64>,
    },
    #[error("lead {lead_id} already has open assignment {assignment_id}")]
    AlreadyRouted {
        lead_id: LeadId,
        assignment_id: AssignmentId,
    },
    #[error("invalid assignment transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: AssignmentStatus,
        to: AssignmentStatus,
    },
    #[error("assignment update lost a concurrent race")]
    Conflict,
    #[error(transparent)]
    ConfigValidation(#[from] super::config::ConfigValidationError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
