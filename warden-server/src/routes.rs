//! REST surface for the supervision server.
//!
//! Review endpoints:
//! - POST   /api/review                 - Ingest a chat exchange
//! - GET    /api/toolcall/:id           - Tool call record
//! - GET    /api/toolcall/:id/state     - Aggregate execution state
//! - POST   /api/toolcall/:id/decision  - Record a supervisor decision
//!
//! Setup endpoints:
//! - POST   /api/run                    - Create a run
//! - POST   /api/run/:id/tool           - Register a tool for a run
//! - GET    /api/run/:id/messages       - Messages recorded for a run
//! - POST   /api/tool/:id/chain         - Configure a chain for a tool
//! - GET    /api/health                 - Health check

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};
use uuid::Uuid;

use warden_core::types::{
    ChatIds, ExecutionStatus, Message, RunExecution, Tool, ToolCall,
};
use warden_core::{ChatPipeline, Hub, ReviewError, ReviewEvent, StatusAggregator, Store};

use crate::ws;

// ============================================================================
// Application state
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub hub: Hub,
    pub pipeline: Arc<ChatPipeline>,
    pub aggregator: Arc<StatusAggregator>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, hub: Hub) -> Self {
        Self {
            pipeline: Arc::new(ChatPipeline::new(store.clone())),
            aggregator: Arc::new(StatusAggregator::new(store.clone())),
            store,
            hub,
        }
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Uniform error body: a short message plus an optional diagnostic string.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub run_id: Uuid,
    /// base64-encoded chat-completion request JSON.
    pub request_data: String,
    /// base64-encoded chat-completion response JSON.
    pub response_data: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateToolRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateChainRequest {
    pub name: String,
    #[serde(default)]
    pub supervisors: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub chain_id: Uuid,
    pub status: ExecutionStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub execution_id: Uuid,
    pub chain_id: Uuid,
    pub tool_call_id: Uuid,
    pub status: ExecutionStatus,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(
    status: StatusCode,
    message: impl Into<String>,
    details: impl Into<String>,
) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            details: details.into(),
        }),
    )
}

/// Map the core taxonomy onto HTTP: invalid input and unresolvable tool
/// names are the caller's to fix (400), absent entities are 404, store
/// failures are 500.
fn review_error(context: &str, err: ReviewError) -> ApiError {
    let status = match &err {
        ReviewError::InvalidInput(_) | ReviewError::ToolNotFound(_) => StatusCode::BAD_REQUEST,
        ReviewError::NotFound { .. } => StatusCode::NOT_FOUND,
        ReviewError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!("{context}: {err}");
    } else {
        warn!("{context}: {err}");
    }
    error_response(status, context, err.to_string())
}

fn store_error(context: &str, err: anyhow::Error) -> ApiError {
    error!("{context}: {err:#}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, context, err.to_string())
}

// ============================================================================
// Router
// ============================================================================

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/review", post(create_review))
        .route("/api/run", post(create_run))
        .route("/api/run/:id/tool", post(create_tool))
        .route("/api/run/:id/messages", get(run_messages))
        .route("/api/tool/:id/chain", post(create_chain))
        .route("/api/toolcall/:id", get(get_tool_call))
        .route("/api/toolcall/:id/state", get(get_tool_call_state))
        .route("/api/toolcall/:id/decision", post(post_decision))
        .route("/ws", get(ws::ws_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /api/review — ingest one chat exchange and announce its tool calls.
async fn create_review(
    State(state): State<AppState>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<ChatIds>, ApiError> {
    let ids = state
        .pipeline
        .ingest(payload.run_id, &payload.request_data, &payload.response_data)
        .await
        .map_err(|err| review_error("error ingesting chat exchange", err))?;

    state
        .hub
        .publish(ReviewEvent::ChatIngested {
            run_id: payload.run_id,
            chat_id: ids.chat_id,
        })
        .await;

    for choice in &ids.choice_ids {
        for tool_call in &choice.tool_call_ids {
            // Resolve the name for observers; a read miss here only degrades
            // the event, never the response.
            let name = match state.store.get_tool_call(tool_call.tool_call_id).await {
                Ok(Some(record)) => record.name,
                _ => String::new(),
            };
            state
                .hub
                .publish(ReviewEvent::ToolCallPending {
                    run_id: payload.run_id,
                    tool_call_id: tool_call.tool_call_id,
                    tool_id: tool_call.tool_id,
                    name,
                })
                .await;
        }
    }

    Ok(Json(ids))
}

/// POST /api/run — create a new run scope.
async fn create_run(State(state): State<AppState>) -> Result<Json<CreatedResponse>, ApiError> {
    let run = state
        .store
        .create_run()
        .await
        .map_err(|err| store_error("error creating run", err))?;
    Ok(Json(CreatedResponse { id: run.id }))
}

/// POST /api/run/:id/tool — register a tool for a run.
async fn create_tool(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Json(payload): Json<CreateToolRequest>,
) -> Result<Json<Tool>, ApiError> {
    state
        .store
        .get_run(run_id)
        .await
        .map_err(|err| store_error("error getting run", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "run not found", ""))?;

    let tool = state
        .store
        .create_tool(run_id, &payload.name, &payload.description)
        .await
        .map_err(|err| store_error("error creating tool", err))?;
    Ok(Json(tool))
}

/// GET /api/run/:id/messages — messages recorded for a run.
async fn run_messages(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> Result<Json<Vec<Message>>, ApiError> {
    state
        .store
        .get_run(run_id)
        .await
        .map_err(|err| store_error("error getting run", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "run not found", ""))?;

    let messages = state
        .store
        .messages_for_run(run_id)
        .await
        .map_err(|err| store_error("error getting messages for run", err))?;
    Ok(Json(messages))
}

/// POST /api/tool/:id/chain — configure a supervisor chain for a tool.
async fn create_chain(
    State(state): State<AppState>,
    Path(tool_id): Path<Uuid>,
    Json(payload): Json<CreateChainRequest>,
) -> Result<Json<CreatedResponse>, ApiError> {
    state
        .store
        .get_tool(tool_id)
        .await
        .map_err(|err| store_error("error getting tool", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "tool not found", ""))?;

    let chain = state
        .store
        .create_chain(tool_id, &payload.name, &payload.supervisors)
        .await
        .map_err(|err| store_error("error creating chain", err))?;
    Ok(Json(CreatedResponse { id: chain.id }))
}

/// GET /api/toolcall/:id — the raw tool call record.
async fn get_tool_call(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ToolCall>, ApiError> {
    let tool_call = state
        .store
        .get_tool_call(id)
        .await
        .map_err(|err| store_error("error getting tool call", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "tool call not found", ""))?;
    Ok(Json(tool_call))
}

/// GET /api/toolcall/:id/state — the aggregate execution state.
async fn get_tool_call_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunExecution>, ApiError> {
    let execution = state
        .aggregator
        .tool_call_state(id)
        .await
        .map_err(|err| review_error("error getting tool call state", err))?;
    Ok(Json(execution))
}

/// POST /api/toolcall/:id/decision — record a supervisor decision for one
/// chain and announce the state change.
async fn post_decision(
    State(state): State<AppState>,
    Path(tool_call_id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let tool_call = state
        .store
        .get_tool_call(tool_call_id)
        .await
        .map_err(|err| store_error("error getting tool call", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "tool call not found", ""))?;

    let chain = state
        .store
        .get_chain(payload.chain_id)
        .await
        .map_err(|err| store_error("error getting chain", err))?
        .ok_or_else(|| error_response(StatusCode::NOT_FOUND, "chain not found", ""))?;

    if chain.tool_id != tool_call.tool_id {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "chain is not configured for this tool call's tool",
            format!("chain {} targets tool {}", chain.id, chain.tool_id),
        ));
    }

    let execution = state
        .store
        .record_chain_decision(chain.id, tool_call_id, payload.status)
        .await
        .map_err(|err| store_error("error recording chain decision", err))?;

    state
        .hub
        .publish(ReviewEvent::ChainStateChanged {
            tool_call_id,
            chain_id: chain.id,
            execution_id: execution.id,
            status: execution.status,
        })
        .await;

    Ok(Json(DecisionResponse {
        execution_id: execution.id,
        chain_id: chain.id,
        tool_call_id,
        status: execution.status,
    }))
}
