use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post, put},
    Router,
};
use cadence_core::{CadenceError, TaskStatus};
use cadence_scheduler::ScheduleSpec;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::runtime::Runtime;

/// Shared application state for API handlers.
pub struct AppState {
    pub runtime: Arc<Runtime>,
}

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/fan-out", post(fan_out))
        .route("/api/tenants/:tenant_id/run", post(run_tenant))
        .route("/api/tenants/:tenant_id/schedules", get(list_schedules))
        .route("/api/tenants/:tenant_id/tasks", get(list_tasks))
        .route("/api/schedules", post(create_schedule))
        .route(
            "/api/schedules/:id",
            put(save_schedule).get(get_schedule).delete(delete_schedule),
        )
        .route("/api/schedules/:id/active", post(set_schedule_active))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/retrigger", post(retrigger_task))
        .route("/api/queue/drain", post(drain_queue))
        .with_state(state)
}

fn error_response(err: CadenceError) -> (StatusCode, Json<Value>) {
    let status = match &err {
        CadenceError::NotFound { .. } => StatusCode::NOT_FOUND,
        CadenceError::InvalidSchedule(_) | CadenceError::RecurrenceParse { .. } => {
            StatusCode::BAD_REQUEST
        }
        CadenceError::VersionConflict { .. } | CadenceError::TaskNotTerminal { .. } => {
            StatusCode::CONFLICT
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!(error = %err, "API request failed");
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn to_json<T: serde::Serialize>(value: T) -> ApiResult {
    serde_json::to_value(value)
        .map(Json)
        .map_err(|e| error_response(CadenceError::Other(e.into())))
}

/// Health check endpoint.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "cadence",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Run the trigger loop for every tenant.
async fn fan_out(State(state): State<Arc<AppState>>) -> ApiResult {
    let report = state
        .runtime
        .fan_out
        .run(Utc::now())
        .await
        .map_err(error_response)?;
    to_json(report)
}

/// Run the trigger loop for one tenant.
async fn run_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult {
    let pass = state
        .runtime
        .trigger
        .run_tenant(&tenant_id, Utc::now())
        .await
        .map_err(error_response)?;
    to_json(pass)
}

async fn list_schedules(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult {
    let schedules = state
        .runtime
        .schedules
        .list_for_tenant(&tenant_id)
        .map_err(error_response)?;
    Ok(Json(json!({ "schedules": schedules })))
}

/// Create a schedule under a generated id.
async fn create_schedule(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<ScheduleSpec>,
) -> ApiResult {
    let id = uuid::Uuid::new_v4().to_string();
    let schedule = state
        .runtime
        .schedules
        .save(&id, spec, Utc::now())
        .map_err(error_response)?;
    to_json(schedule)
}

/// Create or edit the schedule `id`.
async fn save_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(spec): Json<ScheduleSpec>,
) -> ApiResult {
    let schedule = state
        .runtime
        .schedules
        .save(&id, spec, Utc::now())
        .map_err(error_response)?;
    to_json(schedule)
}

async fn get_schedule(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let schedule = state.runtime.schedules.get(&id).map_err(error_response)?;
    to_json(schedule)
}

async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    state.runtime.schedules.delete(&id).map_err(error_response)?;
    Ok(Json(json!({ "status": "deleted", "id": id })))
}

#[derive(Debug, Deserialize)]
struct ActiveBody {
    active: bool,
}

async fn set_schedule_active(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> ApiResult {
    state
        .runtime
        .schedules
        .set_active(&id, body.active)
        .map_err(error_response)?;
    Ok(Json(json!({ "id": id, "active": body.active })))
}

#[derive(Debug, Deserialize)]
struct TaskFilter {
    status: Option<String>,
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    Query(filter): Query<TaskFilter>,
) -> ApiResult {
    let status = match filter.status.as_deref() {
        Some(raw) => Some(raw.parse::<TaskStatus>().map_err(|_| {
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("unknown task status '{raw}'") })),
            )
        })?),
        None => None,
    };
    let tasks = state
        .runtime
        .tasks
        .list(&tenant_id, status)
        .map_err(error_response)?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult {
    let task = state.runtime.tasks.get(&id).map_err(error_response)?;
    to_json(task)
}

/// Enqueue a fresh copy of a finished task.
async fn retrigger_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let task = state
        .runtime
        .tasks
        .retrigger(&id, Utc::now())
        .map_err(error_response)?;
    to_json(task)
}

/// Attempt every task whose retry backoff has elapsed.
async fn drain_queue(State(state): State<Arc<AppState>>) -> ApiResult {
    let report = state
        .runtime
        .worker
        .drain(Utc::now())
        .await
        .map_err(error_response)?;
    to_json(report)
}
