use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use crate::engine::graph::Edge;
use crate::engine::types::{AnswerSlot, ExecutionStatus, RequestConfig, StageId};
use crate::engine::{ExecutionResponse, StartOptions, StatusView};

use super::AppState;
use super::errors::AppError;

// --- Request/Response types ---

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartRequest {
    /// Natural-language infrastructure request.
    pub request: String,
    #[serde(default)]
    pub config: RequestConfig,
    /// Caller-chosen id, for retrying a start after a store failure.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Answers supplied up front.
    #[serde(default)]
    pub answers: BTreeMap<AnswerSlot, String>,
}

#[derive(Deserialize)]
pub struct ResumeRequest {
    pub answer: String,
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct StageInfo {
    pub id: StageId,
    pub phase: String,
    pub critical: bool,
    pub description: String,
    pub successors: Vec<String>,
}

#[derive(Serialize)]
pub struct GraphResponse {
    pub entry: Option<StageId>,
    pub stages: Vec<StageInfo>,
    pub edges: Vec<Edge>,
    pub invocation_bound: u64,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Handlers ---

/// POST /executions
pub async fn start_execution(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<ExecutionResponse>, AppError> {
    let req: StartRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?;
    if req.request.trim().is_empty() {
        return Err(AppError::BadRequest("'request' must not be empty".to_string()));
    }

    let options = StartOptions {
        execution_id: req.execution_id,
        answers: req.answers,
    };
    let response = state
        .engine
        .start_with(&req.request, req.config, options)
        .await?;
    Ok(Json(response))
}

/// POST /executions/{id}/resume
pub async fn resume_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ResumeRequest>,
) -> Result<Json<ExecutionResponse>, AppError> {
    let response = state.engine.resume(&id, &req.answer).await?;
    Ok(Json(response))
}

/// GET /executions/{id}
pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, AppError> {
    Ok(Json(state.engine.status(&id).await?))
}

/// DELETE /executions/{id}
pub async fn cancel_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>, AppError> {
    Ok(Json(state.engine.cancel(&id).await?))
}

/// GET /executions
pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<ExecutionStatus>)
        .transpose()
        .map_err(AppError::BadRequest)?;

    let executions = state.engine.list(status).await?;

    // Summary view without warnings or final output
    let summaries: Vec<serde_json::Value> = executions
        .iter()
        .map(|v| {
            serde_json::json!({
                "execution_id": v.execution_id,
                "status": v.status,
                "current_stage": v.current_stage,
                "resume_stage": v.resume_stage,
                "updated_at": v.updated_at,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({
        "executions": summaries,
        "total": summaries.len(),
    })))
}

/// GET /graph
pub async fn get_graph(State(state): State<Arc<AppState>>) -> Result<Json<GraphResponse>, AppError> {
    let graph = state.engine.graph();

    let mut stages = Vec::new();
    for id in graph.stages() {
        let spec = graph
            .get(*id)
            .map_err(|e| AppError::Internal(e.into()))?;
        stages.push(StageInfo {
            id: *id,
            phase: id.phase().to_string(),
            critical: spec.critical,
            description: spec.stage.description().to_string(),
            successors: spec.successors.iter().map(|n| n.to_string()).collect(),
        });
    }

    Ok(Json(GraphResponse {
        entry: graph.entry(),
        stages,
        edges: graph.edges(),
        invocation_bound: state.engine.settings().guard.invocation_bound(graph),
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
