//! Lead routing and assignment engine.
//!
//! Qualified leads come in, a weighted scoring pass ranks the active agents,
//! and the winner gets a pending assignment with a response deadline. From
//! there the engine tracks the assignment lifecycle, reacts to agent
//! decisions arriving over webhooks, and sweeps up assignments nobody
//! answered.

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod repository;
pub mod router;
pub mod scoring;
pub mod store;
pub mod sweeper;
pub mod webhook;

#[cfg(test)]
mod tests;

pub use config::{ConfigValidationError, RoutingConfig, RoutingConfigHandle};
pub use coordinator::{
    BatchEntry, BatchReport, ReassignDisposition, ReassignOutcome, RouteOptions,
    RoutingCoordinator, RoutingDecision,
};
pub use domain::{
    Agent, AgentId, Assignment, AssignmentId, AssignmentOutcome, AssignmentStatus, Lead, LeadId,
    LeadStatus, Location, RoutingError,
};
pub use repository::{
    AgentRepository, AssignmentRepository, AuditError, AuditEvent, AuditKind, AuditSink, IdSource,
    LeadRepository, RepositoryError, SequentialIds,
};
pub use router::{routing_router, RoutingApi};
pub use scoring::{FactorBreakdown, ScoreComponent, ScoredCandidate, ScoringEngine, ScoringFactor};
pub use store::{AssignmentStore, TransitionMetadata};
pub use sweeper::{ExpirySweeper, SweepSummary};
pub use webhook::{
    WebhookEnvelope, WebhookEvent, WebhookParseError, WebhookReaction, WebhookReactor,
};
