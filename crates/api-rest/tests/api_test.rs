//! Router tests for the experiment API

use abtest_api_rest::{build_router, AppState};
use abtest_config::EngineConfig;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> Router {
    build_router(AppState::from_config(EngineConfig::default()).unwrap())
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn create_body(control_weight: f64, variant_weight: f64) -> Value {
    json!({
        "test_name": "Newsletter subject",
        "test_type": "content_format",
        "variants": [
            {"name": "control", "weight": control_weight, "is_control": true},
            {"name": "question", "weight": variant_weight, "content_config": {"subject": "Ready?"}}
        ],
        "target_segments": [],
        "duration_days": 14,
        "traffic_allocation": 1.0
    })
}

async fn create_experiment(app: &Router) -> String {
    let (status, body) = send(app, Method::POST, "/experiments", Some(create_body(0.5, 0.5))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_200() {
    let (status, body) = send(&app(), Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn create_experiment_returns_201_as_draft() {
    let app = app();
    let (status, body) = send(&app, Method::POST, "/experiments", Some(create_body(0.5, 0.5))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "draft");
    assert_eq!(body["name"], "Newsletter subject");
    assert_eq!(body["variants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn create_experiment_with_bad_weights_returns_400() {
    let (status, body) = send(&app(), Method::POST, "/experiments", Some(create_body(0.5, 0.3))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("variant weights must sum to 100%"));
}

#[tokio::test]
async fn create_experiment_with_empty_name_returns_400() {
    let mut body = create_body(0.5, 0.5);
    body["test_name"] = json!("");
    let (status, body) = send(&app(), Method::POST, "/experiments", Some(body)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn unknown_experiment_returns_404() {
    let uri = format!("/experiments/{}", uuid::Uuid::new_v4());
    let (status, body) = send(&app(), Method::GET, &uri, None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "experiment_not_found");
}

#[tokio::test]
async fn list_experiments_filters_by_status() {
    let app = app();
    let first = create_experiment(&app).await;
    create_experiment(&app).await;
    send(&app, Method::POST, &format!("/experiments/{first}/start"), None).await;

    let (status, body) = send(&app, Method::GET, "/experiments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (_, body) = send(&app, Method::GET, "/experiments?status=active", None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], first.as_str());
}

#[tokio::test]
async fn lifecycle_transitions() {
    let app = app();
    let id = create_experiment(&app).await;

    let (status, body) = send(&app, Method::POST, &format!("/experiments/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_transition");

    let (status, body) = send(&app, Method::POST, &format!("/experiments/{id}/start"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");
    assert!(body["started_at"].is_string());

    let (status, _) = send(&app, Method::POST, &format!("/experiments/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, Method::POST, &format!("/experiments/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, body) = send(&app, Method::POST, &format!("/experiments/{id}/end"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["final_result"]["is_final"], true);

    let (status, _) = send(&app, Method::POST, &format!("/experiments/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn assign_and_record_events() {
    let app = app();
    let id = create_experiment(&app).await;

    // Draft experiments do not enroll
    let assign_uri = format!("/experiments/{id}/assign");
    let (status, body) = send(&app, Method::POST, &assign_uri, Some(json!({"subject_id": "u1"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "not_eligible");

    send(&app, Method::POST, &format!("/experiments/{id}/start"), None).await;

    let (status, first) = send(&app, Method::POST, &assign_uri, Some(json!({"subject_id": "u1"}))).await;
    assert_eq!(status, StatusCode::OK);
    let variant_id = first["variant_id"].as_str().unwrap().to_string();
    assert!(first["content_config"].is_object() || first["content_config"].is_null());

    let (_, again) = send(&app, Method::POST, &assign_uri, Some(json!({"subject_id": "u1"}))).await;
    assert_eq!(again["variant_id"], variant_id.as_str());

    let events_uri = format!("/experiments/{id}/events");
    let exposure = json!({"variant_id": variant_id, "subject_id": "u1", "kind": "exposure"});
    let (status, ack) = send(&app, Method::POST, &events_uri, Some(exposure.clone())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["counted"], true);

    let (status, ack) = send(&app, Method::POST, &events_uri, Some(exposure)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["counted"], false);

    let conversion = json!({"variant_id": variant_id, "subject_id": "u1", "kind": "conversion", "value": 12.5});
    let (status, ack) = send(&app, Method::POST, &events_uri, Some(conversion)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["counted"], true);

    let stranger = json!({"variant_id": variant_id, "subject_id": "nobody", "kind": "exposure"});
    let (status, _) = send(&app, Method::POST, &events_uri, Some(stranger)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn results_too_early_then_interim() {
    let app = app();
    let id = create_experiment(&app).await;
    send(&app, Method::POST, &format!("/experiments/{id}/start"), None).await;

    let (status, body) = send(&app, Method::GET, &format!("/experiments/{id}/results?final=true"), None).await;
    assert_eq!(status, StatusCode::TOO_EARLY);
    assert_eq!(body["error"], "too_early");

    let (status, body) = send(&app, Method::GET, &format!("/experiments/{id}/results"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["winner_variant"], Value::Null);
    assert_eq!(body["is_final"], false);
    assert!(body["recommendations"][0]
        .as_str()
        .unwrap()
        .starts_with("No clear winner"));
}

#[tokio::test]
async fn responses_carry_request_id() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "trace-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-42");
}
