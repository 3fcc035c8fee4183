
use actix_web::{http::StatusCode, test, web, App};
use agent_softphone::api;
use agent_softphone::backend::AgentBackend;
use agent_softphone::services::{AgentStatusCoordinator, CallStateClient};
use sdk_simulator::{FakeSdk, InMemoryBackend};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    sdk: Arc<FakeSdk>,
    calls: Arc<CallStateClient>,
    agent: Arc<AgentStatusCoordinator>,
    backend: Arc<dyn AgentBackend>,
}

fn stack() -> Stack {
    let sdk = FakeSdk::new();
    let backend: Arc<dyn AgentBackend> = InMemoryBackend::new(0);
    let calls = CallStateClient::new(sdk.clone(), Duration::from_secs(1));
    let agent = AgentStatusCoordinator::new(calls.clone(), backend.clone(), 30);
    Stack { sdk, calls, agent, backend }
}

macro_rules! service {
    ($stack:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($stack.calls.clone()))
                .app_data(web::Data::new($stack.agent.clone()))
                .app_data(web::Data::new($stack.backend.clone()))
                .configure(api::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_endpoint() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "agent-softphone");
    assert_eq!(body["sdk_ready"], false);
}

#[actix_web::test]
async fn test_initialize_and_read_state() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::post().uri("/api/v1/softphone/initialize").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/api/v1/softphone").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["call"]["call_state"], "idle");
    assert_eq!(body["data"]["call"]["is_ready"], true);
    assert_eq!(body["data"]["agent"]["status"], "offline");
    assert_eq!(stack.sdk.connect_count(), 1);
}

#[actix_web::test]
async fn test_invalid_dial_number_is_rejected() {
    let stack = stack();
    let app = service!(stack);
    stack.calls.initialize().await.unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/calls")
        .set_json(json!({ "phone_number": "call-me-maybe" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
    assert!(stack.sdk.commands().is_empty());
}

#[actix_web::test]
async fn test_dial_before_initialize_is_unavailable() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::post()
        .uri("/api/v1/calls")
        .set_json(json!({ "phone_number": "+254700000001" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_ready");
}

#[actix_web::test]
async fn test_busy_cannot_be_selected() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::post()
        .uri("/api/v1/agent/status")
        .set_json(json!({ "status": "busy" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "status_not_selectable");
}

#[actix_web::test]
async fn test_invalid_dtmf_digit() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::post()
        .uri("/api/v1/calls/dtmf")
        .set_json(json!({ "digit": "55" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_call_history_paging() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::get().uri("/api/v1/calls/history").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["page"], 1);
    assert_eq!(body["per_page"], 20);
    assert_eq!(body["data"][0]["direction"], "outbound");

    let req = test::TestRequest::get()
        .uri("/api/v1/calls/history?per_page=500")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_unknown_queue_is_not_found() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::get().uri("/api/v1/queues/sales/agents").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get().uri("/api/v1/queues/support/agents").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["suggested_action"], "Refresh and try again.");
}

#[actix_web::test]
async fn test_schedule_and_complete_callback() {
    let stack = stack();
    let app = service!(stack);

    let req = test::TestRequest::post()
        .uri("/api/v1/callbacks")
        .set_json(json!({
            "phone_number": "+254700000001",
            "notes": "Wants a quote",
            "scheduled_for": "2026-10-20T09:00:00Z"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["message"], "Callback scheduled");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/callbacks/{}/complete", id))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let req = test::TestRequest::get().uri("/api/v1/callbacks").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"][0]["completed"], true);
}
