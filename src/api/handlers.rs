// src/api/handlers.rs
use actix_web::{web, HttpResponse};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, instrument};
use validator::Validate;

use crate::backend::AgentBackend;
use crate::error::SoftphoneError;
use crate::models::{
    ApiResponse, CreateCallbackRequest, DialRequest, DtmfRequest, HealthResponse, HistoryQuery,
    StatusChangeRequest,
};
use crate::SoftphoneResult;
use crate::services::{AgentSnapshot, AgentStatusCoordinator, CallStateClient, SoftphoneSnapshot};

pub type Calls = web::Data<Arc<CallStateClient>>;
pub type Agent = web::Data<Arc<AgentStatusCoordinator>>;
pub type Backend = web::Data<Arc<dyn AgentBackend>>;

type HandlerResult = SoftphoneResult<HttpResponse>;

/// Everything the dashboard renders
#[derive(Debug, Serialize)]
pub struct SoftphoneState {
    pub call: SoftphoneSnapshot,
    pub agent: AgentSnapshot,
}

fn state(calls: &CallStateClient, agent: &AgentStatusCoordinator) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(SoftphoneState {
        call: calls.snapshot(),
        agent: agent.snapshot(),
    }))
}

fn call_snapshot(calls: &CallStateClient) -> HttpResponse {
    HttpResponse::Ok().json(ApiResponse::success(calls.snapshot()))
}

pub async fn health_check(calls: Calls) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        service: "agent-softphone".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        sdk_ready: calls.is_ready(),
    })
}

// ==================== Softphone ====================

/// GET /api/v1/softphone
pub async fn get_softphone(calls: Calls, agent: Agent) -> HttpResponse {
    state(&calls, &agent)
}

/// POST /api/v1/softphone/initialize
#[instrument(skip_all)]
pub async fn initialize_softphone(calls: Calls, agent: Agent) -> HandlerResult {
    calls.initialize().await?;
    Ok(state(&calls, &agent))
}

// ==================== Agent status ====================

/// POST /api/v1/agent/status
#[instrument(skip(calls, agent))]
pub async fn change_status(
    req: web::Json<StatusChangeRequest>,
    calls: Calls,
    agent: Agent,
) -> HandlerResult {
    agent.handle_status_change(req.status).await?;
    Ok(state(&calls, &agent))
}

/// POST /api/v1/agent/connection-failure/dismiss
pub async fn dismiss_connection_failure(calls: Calls, agent: Agent) -> HttpResponse {
    agent.dismiss_connection_failure();
    state(&calls, &agent)
}

// ==================== Calls ====================

/// POST /api/v1/calls
#[instrument(skip(calls))]
pub async fn make_call(req: web::Json<DialRequest>, calls: Calls) -> HandlerResult {
    req.validate()?;
    let req = req.into_inner();
    calls.make_call(&req.phone_number, req.label).await?;
    Ok(call_snapshot(&calls))
}

/// POST /api/v1/calls/answer
pub async fn answer_call(calls: Calls) -> HandlerResult {
    calls.answer_call().await?;
    Ok(call_snapshot(&calls))
}

/// POST /api/v1/calls/reject
pub async fn reject_call(calls: Calls) -> HandlerResult {
    calls.reject_call().await?;
    Ok(call_snapshot(&calls))
}

/// POST /api/v1/calls/end
pub async fn end_call(calls: Calls) -> HandlerResult {
    calls.end_call().await?;
    Ok(call_snapshot(&calls))
}

/// POST /api/v1/calls/mute
pub async fn toggle_mute(calls: Calls) -> HandlerResult {
    let muted = calls.toggle_mute().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "muted": muted }))))
}

/// POST /api/v1/calls/hold
pub async fn toggle_hold(calls: Calls) -> HandlerResult {
    let on_hold = calls.toggle_hold().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(json!({ "on_hold": on_hold }))))
}

/// POST /api/v1/calls/dtmf
pub async fn send_dtmf(req: web::Json<DtmfRequest>, calls: Calls) -> HandlerResult {
    req.validate()?;
    let digit = req
        .digit()
        .ok_or_else(|| SoftphoneError::Validation("digit is required".to_string()))?;
    calls.send_dtmf(digit).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// POST /api/v1/calls/dismiss
pub async fn dismiss_ended(calls: Calls) -> HandlerResult {
    calls.dismiss_ended()?;
    Ok(call_snapshot(&calls))
}

/// GET /api/v1/calls/history?page=1&per_page=20
#[instrument(skip(backend))]
pub async fn call_history(query: web::Query<HistoryQuery>, backend: Backend) -> HandlerResult {
    query.validate()?;
    let page = backend.call_history(query.page, query.per_page).await?;
    Ok(HttpResponse::Ok().json(page))
}

// ==================== Queues ====================

/// GET /api/v1/queues
pub async fn list_queues(backend: Backend) -> HandlerResult {
    let queues = backend.list_queues().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(queues)))
}

/// GET /api/v1/queues/{id}/agents
pub async fn queue_agents(path: web::Path<String>, backend: Backend) -> HandlerResult {
    let agents = backend.queue_agents(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(agents)))
}

// ==================== Callbacks ====================

/// GET /api/v1/callbacks
pub async fn list_callbacks(backend: Backend) -> HandlerResult {
    let callbacks = backend.list_callbacks().await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(callbacks)))
}

/// POST /api/v1/callbacks
#[instrument(skip(backend))]
pub async fn create_callback(
    req: web::Json<CreateCallbackRequest>,
    backend: Backend,
) -> HandlerResult {
    req.validate()?;
    let callback = backend.create_callback(&req).await?;
    info!("📅 Callback {} scheduled for {}", callback.id, callback.scheduled_for);
    Ok(HttpResponse::Created().json(ApiResponse::with_message(callback, "Callback scheduled")))
}

/// POST /api/v1/callbacks/{id}/complete
pub async fn complete_callback(path: web::Path<String>, backend: Backend) -> HandlerResult {
    let id = path.into_inner();
    backend.complete_callback(&id).await?;
    Ok(HttpResponse::NoContent().finish())
}
