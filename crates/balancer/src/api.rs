//! HTTP API for health checks, Prometheus metrics, and manual cycles

use balancer_lib::{
    engine::{CycleReport, CycleScheduler},
    health::{ComponentStatus, HealthRegistry},
    models::PoolId,
    plan::{PlanMode, ThresholdSet},
};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub scheduler: Arc<CycleScheduler>,
}

impl AppState {
    pub fn new(health_registry: HealthRegistry, scheduler: Arc<CycleScheduler>) -> Self {
        Self {
            health_registry,
            scheduler,
        }
    }
}

/// A configured plan as reported by `GET /plans`
#[derive(Debug, Serialize)]
struct PlanView {
    name: String,
    mode: PlanMode,
    pools: Vec<PoolId>,
    thresholds: ThresholdSet,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Configured plans
async fn plans(State(state): State<Arc<AppState>>) -> Json<Vec<PlanView>> {
    let plans = state.scheduler.balancer().plans().await;

    Json(
        plans
            .iter()
            .map(|plan| PlanView {
                name: plan.name.clone(),
                mode: plan.mode(),
                pools: plan.pool_ids.clone(),
                thresholds: plan.thresholds,
            })
            .collect(),
    )
}

/// Run one cycle now; 409 when a cycle is already running
async fn run_cycle(
    State(state): State<Arc<AppState>>,
) -> Result<Json<CycleReport>, (StatusCode, Json<ErrorBody>)> {
    match state.scheduler.balancer().execute().await {
        Some(report) => {
            info!(
                plans = report.outcomes.len(),
                migrations = report.migrations_proposed(),
                "Manual cycle complete"
            );
            Ok(Json(report))
        }
        None => Err((
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "a balancing cycle is already running".to_string(),
            }),
        )),
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/plans", get(plans))
        .route("/cycle", post(run_cycle))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
