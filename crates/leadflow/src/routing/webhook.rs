use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::warn;

use super::coordinator::{
    ReassignDisposition, RouteOptions, RoutingCoordinator, RoutingDecision,
};
use super::domain::{Assignment, AssignmentId, LeadId, RoutingError};
use super::repository::{AgentRepository, AssignmentRepository, AuditSink, LeadRepository};

/// Raw webhook body: an event name plus an event-specific payload.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A known payload arrived malformed. Unknown event names are not an error;
/// they parse to [`WebhookEvent::Unrecognized`].
#[derive(Debug, thiserror::Error)]
#[error("malformed payload for webhook event '{event}': {source}")]
pub struct WebhookParseError {
    pub event: String,
    #[source]
    pub source: serde_json::Error,
}

#[derive(Debug, Clone, Deserialize)]
struct LeadQualifiedPayload {
    lead_id: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AssignmentEventPayload {
    assignment_id: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Upstream events the routing engine reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    LeadQualified {
        lead_id: LeadId,
    },
    AgentAccepted {
        assignment_id: AssignmentId,
    },
    AgentRejected {
        assignment_id: AssignmentId,
        reason: Option<String>,
    },
    /// An event name this engine does not handle. Tolerated, never an error.
    Unrecognized {
        event: String,
    },
}

impl WebhookEnvelope {
    pub fn into_event(self) -> Result<WebhookEvent, WebhookParseError> {
        let WebhookEnvelope { event, data } = self;
        match event.as_str() {
            "lead.qualified" => {
                let payload: LeadQualifiedPayload = decode(&event, data)?;
                Ok(WebhookEvent::LeadQualified {
                    lead_id: LeadId(payload.lead_id),
                })
            }
            "agent.accepted" => {
                let payload: AssignmentEventPayload = decode(&event, data)?;
                Ok(WebhookEvent::AgentAccepted {
                    assignment_id: AssignmentId(payload.assignment_id),
                })
            }
            "agent.rejected" => {
                let payload: AssignmentEventPayload = decode(&event, data)?;
                Ok(WebhookEvent::AgentRejected {
                    assignment_id: AssignmentId(payload.assignment_id),
                    reason: payload.reason,
                })
            }
            _ => Ok(WebhookEvent::Unrecognized { event }),
        }
    }
}

fn decode<T: DeserializeOwned>(
    event: &str,
    data: serde_json::Value,
) -> Result<T, WebhookParseError> {
    serde_json::from_value(data).map_err(|source| WebhookParseError {
        event: event.to_string(),
        source,
    })
}

/// What a webhook event changed.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WebhookReaction {
    Routed {
        decision: RoutingDecision,
    },
    Accepted {
        assignment: Assignment,
    },
    Rejected {
        closed: Assignment,
        /// Absent when no alternative agent was eligible.
        replacement: Option<RoutingDecision>,
    },
    Ignored {
        event: String,
    },
}

/// Translates upstream webhook events into coordinator calls.
pub struct WebhookReactor<L, A, S, D> {
    coordinator: Arc<RoutingCoordinator<L, A, S, D>>,
}

impl<L, A, S, D> Clone for WebhookReactor<L, A, S, D> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<L, A, S, D> WebhookReactor<L, A, S, D>
where
    L: LeadRepository,
    A: AgentRepository,
    S: AssignmentRepository,
    D: AuditSink,
{
    pub fn new(coordinator: Arc<RoutingCoordinator<L, A, S, D>>) -> Self {
        Self { coordinator }
    }

    pub fn react(&self, event: WebhookEvent) -> Result<WebhookReaction, RoutingError> {
        match event {
            WebhookEvent::LeadQualified { lead_id } => self
                .coordinator
                .route_lead(&lead_id, RouteOptions::default())
                .map(|decision| WebhookReaction::Routed { decision }),
            WebhookEvent::AgentAccepted { assignment_id } => self
                .coordinator
                .accept(&assignment_id)
                .map(|assignment| WebhookReaction::Accepted { assignment }),
            WebhookEvent::AgentRejected {
                assignment_id,
                reason,
            } => {
                let outcome = self.coordinator.reassign(
                    &assignment_id,
                    ReassignDisposition::Rejected { reason },
                    &[],
                )?;
                Ok(WebhookReaction::Rejected {
                    closed: outcome.closed,
                    replacement: outcome.replacement,
                })
            }
            WebhookEvent::Unrecognized { event } => {
                warn!(event = %event, "ignoring unrecognized webhook event");
                self.coordinator.note_ignored_event(&event);
                Ok(WebhookReaction::Ignored { event })
            }
        }
    }
}
