//! HTTP API
//!
//! Endpoints:
//! - POST /v1/runs                                : run a batch of work items
//! - GET  /v1/pools/{user_id}/{provider}          : pool health summary
//! - POST /v1/pools/{user_id}/{provider}/refresh  : probe every key, then summarize
//! - GET  /health                                 : service status
//! - GET  /metrics                                : Prometheus text format
//!
//! A `KeyPool` is built per request from the shared store and client; the
//! store is the only state that outlives a request.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use batch_runner::{BatchScheduler, RunPlan, RunReport, WorkItem};
use common::{Clock, Tuning};
use key_pool::{KeyPool, PoolScope};
use key_store::CredentialStore;
use metrics_exporter_prometheus::PrometheusHandle;
use provider::RemoteTaskClient;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::config::RemoteConfig;
use crate::error::ApiError;
use crate::metrics;

/// Request counters for `/health` and shutdown drain reporting.
#[derive(Clone)]
pub struct ServiceStats {
    pub runs_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            runs_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Decrements `in_flight` when the run handler finishes or is dropped.
struct InFlight(Arc<AtomicU64>);

impl InFlight {
    fn enter(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn CredentialStore>,
    pub client: Arc<dyn RemoteTaskClient>,
    pub clock: Arc<dyn Clock>,
    pub tuning: Arc<Tuning>,
    pub remote: Arc<RemoteConfig>,
    pub stats: ServiceStats,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    fn pool(&self, user_id: &str, provider: &str) -> KeyPool {
        KeyPool::new(
            PoolScope::new(user_id, provider),
            self.store.clone(),
            self.client.clone(),
            (*self.tuning).clone(),
            self.clock.clone(),
        )
    }
}

/// Build the axum router with all routes and shared state.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/runs", post(run_handler))
        .route("/v1/pools/{user_id}/{provider}", get(pool_handler))
        .route("/v1/pools/{user_id}/{provider}/refresh", post(refresh_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub user_id: String,
    pub provider: String,
    #[serde(default)]
    pub work_type: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    pub items: Vec<WorkItem>,
}

#[derive(Serialize)]
struct RunResponse<'a> {
    request_id: &'a str,
    work_type: &'a str,
    #[serde(flatten)]
    report: &'a RunReport,
}

/// POST /v1/runs: run every item against the user's credential pool.
async fn run_handler(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request_id = new_request_id();
    let Json(request) = payload.map_err(|e| ApiError::invalid(e.body_text(), &request_id))?;

    let _in_flight = InFlight::enter(&state.stats.in_flight);
    state.stats.runs_total.fetch_add(1, Ordering::Relaxed);

    let started = Instant::now();
    let result = execute_run(&state, request, &request_id).await;
    let label = match &result {
        Ok(response) => response.0,
        Err(e) => e.error_type(),
    };
    metrics::record_run(label, started.elapsed().as_secs_f64());

    result.map(|(_, response)| response)
}

#[instrument(
    name = "run",
    skip_all,
    fields(request_id = %request_id, user_id = %request.user_id, provider = %request.provider)
)]
async fn execute_run(
    state: &AppState,
    request: RunRequest,
    request_id: &str,
) -> Result<(&'static str, Response), ApiError> {
    if request.user_id.trim().is_empty() || request.provider.trim().is_empty() {
        return Err(ApiError::invalid(
            "user_id and provider must not be empty",
            request_id,
        ));
    }
    if request.batch_size == Some(0) {
        return Err(ApiError::invalid(
            "batch_size must be greater than 0",
            request_id,
        ));
    }
    let Some((work_type, actor)) = state.remote.actor_for(request.work_type.as_deref()) else {
        let message = match request.work_type {
            Some(w) => format!("unknown work_type: {w}"),
            None => "work_type is required".to_string(),
        };
        return Err(ApiError::invalid(message, request_id));
    };

    let plan = RunPlan {
        actor,
        work_type: Some(work_type.clone()),
        batch_size: request.batch_size.unwrap_or(state.tuning.batch_size),
    };
    info!(
        work_type = %work_type,
        items = request.items.len(),
        batch_size = plan.batch_size,
        "run accepted"
    );

    let pool = Arc::new(state.pool(&request.user_id, &request.provider));
    let scheduler = BatchScheduler::new(pool, state.client.clone());
    let report = match scheduler.run(request.items, &plan).await {
        Ok(report) => report,
        Err(batch_runner::Error::Pool(e)) => {
            warn!(error = %e, "run rejected");
            return Err(ApiError::from_pool(e, request_id));
        }
    };

    let body = RunResponse {
        request_id,
        work_type: &work_type,
        report: &report,
    };
    let response = (StatusCode::OK, Json(body)).into_response();
    Ok((report.status.as_str(), response))
}

/// GET /v1/pools/{user_id}/{provider}: pool health summary.
///
/// Never exposes tokens; each key shows only its last four characters.
async fn pool_handler(
    State(state): State<AppState>,
    Path((user_id, provider)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request_id = new_request_id();
    let health = state
        .pool(&user_id, &provider)
        .health()
        .await
        .map_err(|e| ApiError::from_pool(e, &request_id))?;
    Ok((StatusCode::OK, Json(health)).into_response())
}

/// POST /v1/pools/{user_id}/{provider}/refresh: probe every key regardless
/// of status or cooldown.
async fn refresh_handler(
    State(state): State<AppState>,
    Path((user_id, provider)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let request_id = new_request_id();
    let pool = state.pool(&user_id, &provider);
    let summary = pool
        .refresh_all()
        .await
        .map_err(|e| ApiError::from_pool(e, &request_id))?;
    let health = pool
        .health()
        .await
        .map_err(|e| ApiError::from_pool(e, &request_id))?;
    info!(
        user_id = %user_id,
        provider = %provider,
        probed = summary.probed,
        recovered = summary.recovered,
        "pool refreshed"
    );
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "summary": summary, "pool": health })),
    )
        .into_response())
}

/// GET /health: uptime and run counters.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.stats.started_at.elapsed().as_secs(),
        "runs_served": state.stats.runs_total.load(Ordering::Relaxed),
        "runs_in_flight": state.stats.in_flight.load(Ordering::Relaxed),
    });
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint: returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
