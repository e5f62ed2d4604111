use crate::cli::ServeArgs;
use crate::infra::{
    seed, AppState, InMemoryAgentRepository, InMemoryAssignmentRepository, InMemoryLeadRepository,
    RecordingAuditSink,
};
use crate::routes::with_routing_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use leadflow::config::AppConfig;
use leadflow::error::AppError;
use leadflow::routing::config::RoutingConfigHandle;
use leadflow::routing::coordinator::RoutingCoordinator;
use leadflow::routing::repository::SequentialIds;
use leadflow::routing::router::RoutingApi;
use leadflow::routing::store::AssignmentStore;
use leadflow::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let leads = Arc::new(InMemoryLeadRepository::default());
    let agents = Arc::new(InMemoryAgentRepository::default());
    let assignments = Arc::new(InMemoryAssignmentRepository::default());
    let audit = Arc::new(RecordingAuditSink::default());
    seed(&leads, &agents);

    let store = AssignmentStore::new(assignments, Arc::new(SequentialIds::default()));
    let coordinator = Arc::new(RoutingCoordinator::new(
        leads,
        agents,
        store,
        audit,
        RoutingConfigHandle::new(config.routing.clone()),
    ));
    let api = Arc::new(RoutingApi::new(coordinator, config.sweeper.interval()));
    tokio::spawn(api.sweeper.clone().run());

    let app = with_routing_routes(api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "lead routing engine ready");

    axum::serve(listener, app).await?;
    Ok(())
}
