use std::sync::Arc;
use std::time::Duration as StdDuration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::config::RoutingConfig;
use super::coordinator::{RouteOptions, RoutingCoordinator};
use super::domain::{AgentId, AssignmentId, AssignmentOutcome, LeadId, RoutingError};
use super::repository::{
    AgentRepository, AssignmentRepository, AuditSink, LeadRepository, RepositoryError,
};
use super::sweeper::ExpirySweeper;
use super::webhook::{WebhookEnvelope, WebhookReactor};

/// Shared state behind the routing endpoints: the coordinator plus the two
/// collaborators built on top of it.
pub struct RoutingApi<L, A, S, D> {
    pub coordinator: Arc<RoutingCoordinator<L, A, S, D>>,
    pub sweeper: ExpirySweeper<L, A, S, D>,
    pub reactor: WebhookReactor<L, A, S, D>,
}

impl<L, A, S, D> RoutingApi<L, A, S, D>
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    pub fn new(
        coordinator: Arc<RoutingCoordinator<L, A, S, D>>,
        sweep_interval: StdDuration,
    ) -> Self {
        let sweeper = ExpirySweeper::new(Arc::clone(&coordinator), sweep_interval);
        let reactor = WebhookReactor::new(Arc::clone(&coordinator));
        Self {
            coordinator,
            sweeper,
            reactor,
        }
    }
}

/// Router builder exposing the routing engine over HTTP.
pub fn routing_router<L, A, S, D>(api: Arc<RoutingApi<L, A, S, D>>) -> Router
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/routing/config",
            get(get_config_handler::<L, A, S, D>).put(put_config_handler::<L, A, S, D>),
        )
        .route(
            "/api/v1/routing/process-lead",
            post(process_lead_handler::<L, A, S, D>),
        )
        .route(
            "/api/v1/routing/route/:lead_id",
            post(route_lead_handler::<L, A, S, D>),
        )
        .route("/api/v1/routing/batch", post(batch_route_handler::<L, A, S, D>))
        .route(
            "/api/v1/routing/reassign-stale",
            post(reassign_stale_handler::<L, A, S, D>),
        )
        .route("/api/v1/webhooks/routing", post(webhook_handler::<L, A, S, D>))
        .route(
            "/api/v1/assignments/:assignment_id",
            get(get_assignment_handler::<L, A, S, D>),
        )
        .route(
            "/api/v1/assignments/:assignment_id/outcome",
            post(record_outcome_handler::<L, A, S, D>),
        )
        .route(
            "/api/v1/assignments/:assignment_id/cancel",
            post(cancel_assignment_handler::<L, A, S, D>),
        )
        .route(
            "/api/v1/leads/:lead_id/assignments",
            get(lead_assignments_handler::<L, A, S, D>),
        )
        .with_state(api)
}

pub(crate) fn routing_error_status(err: &RoutingError) -> StatusCode {
    match err {
        RoutingError::LeadNotFound(_)
        | RoutingError::AgentNotFound(_)
        | RoutingError::AssignmentNotFound(_)
        | RoutingError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        RoutingError::AlreadyRouted { .. }
        | RoutingError::InvalidTransition { .. }
        | RoutingError::Conflict
        | RoutingError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        RoutingError::NoEligibleAgent { .. } | RoutingError::ConfigValidation(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RoutingError::Repository(RepositoryError::Unavailable(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn routing_error_response(err: RoutingError) -> Response {
    let status = routing_error_status(&err);
    let payload = json!({
        "error": err.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProcessLeadRequest {
    lead_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct RouteLeadRequest {
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default)]
    exclude_agent_ids: Vec<String>,
    #[serde(default)]
    reassign: bool,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BatchRouteRequest {
    lead_ids: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ReassignStaleRequest {
    #[serde(default)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OutcomeRequest {
    outcome: OutcomeKind,
    #[serde(default)]
    conversion_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum OutcomeKind {
    Completed,
    Converted,
}

pub(crate) async fn get_config_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    (StatusCode::OK, axum::Json(api.coordinator.current_config())).into_response()
}

pub(crate) async fn put_config_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    axum::Json(next): axum::Json<RoutingConfig>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    match api.coordinator.update_config(next) {
        Ok(applied) => (StatusCode::OK, axum::Json(applied)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn process_lead_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    axum::Json(request): axum::Json<ProcessLeadRequest>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let lead_id = LeadId(request.lead_id);
    match api.coordinator.route_lead(&lead_id, RouteOptions::default()) {
        Ok(decision) => (StatusCode::CREATED, axum::Json(decision)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn route_lead_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    Path(lead_id): Path<String>,
    axum::Json(request): axum::Json<RouteLeadRequest>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let options = RouteOptions {
        agent: request.agent_id.map(AgentId),
        exclude: request.exclude_agent_ids.into_iter().map(AgentId).collect(),
        reassign: request.reassign,
        notes: request.notes,
    };
    match api.coordinator.route_lead(&LeadId(lead_id), options) {
        Ok(decision) => (StatusCode::CREATED, axum::Json(decision)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn batch_route_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    axum::Json(request): axum::Json<BatchRouteRequest>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let lead_ids: Vec<LeadId> = request.lead_ids.into_iter().map(LeadId).collect();
    let report = api.coordinator.batch_route(&lead_ids);
    (StatusCode::OK, axum::Json(report)).into_response()
}

pub(crate) async fn reassign_stale_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    axum::Json(request): axum::Json<ReassignStaleRequest>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let max_age = request
        .timeout_ms
        .map(|ms| chrono::Duration::milliseconds(ms as i64));
    match api.sweeper.sweep_once(max_age) {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn webhook_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    axum::Json(envelope): axum::Json<WebhookEnvelope>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let event = match envelope.into_event() {
        Ok(event) => event,
        Err(err) => {
            let payload = json!({
                "error": err.to_string(),
            });
            return (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(payload)).into_response();
        }
    };
    match api.reactor.react(event) {
        Ok(reaction) => (StatusCode::OK, axum::Json(reaction)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn get_assignment_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    Path(assignment_id): Path<String>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    match api.coordinator.assignment(&AssignmentId(assignment_id)) {
        Ok(assignment) => (StatusCode::OK, axum::Json(assignment)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn record_outcome_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    Path(assignment_id): Path<String>,
    axum::Json(request): axum::Json<OutcomeRequest>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    let outcome = match request.outcome {
        OutcomeKind::Completed => AssignmentOutcome::Completed,
        OutcomeKind::Converted => AssignmentOutcome::Converted {
            value: request.conversion_value,
        },
    };
    match api
        .coordinator
        .record_outcome(&AssignmentId(assignment_id), outcome)
    {
        Ok(assignment) => (StatusCode::OK, axum::Json(assignment)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn cancel_assignment_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    Path(assignment_id): Path<String>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    match api.coordinator.cancel(&AssignmentId(assignment_id)) {
        Ok(assignment) => (StatusCode::OK, axum::Json(assignment)).into_response(),
        Err(err) => routing_error_response(err),
    }
}

pub(crate) async fn lead_assignments_handler<L, A, S, D>(
    State(api): State<Arc<RoutingApi<L, A, S, D>>>,
    Path(lead_id): Path<String>,
) -> Response
where
    L: LeadRepository + 'static,
    A: AgentRepository + 'static,
    S: AssignmentRepository + 'static,
    D: AuditSink + 'static,
{
    match api.coordinator.assignments_for_lead(&LeadId(lead_id)) {
        Ok(assignments) => (StatusCode::OK, axum::Json(assignments)).into_response(),
        Err(err) => routing_error_response(err),
    }
}
