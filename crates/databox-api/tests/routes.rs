//! Route-level tests through the full router.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use databox_api::build_router;
use databox_backend::MemoryBackend;
use databox_client::{RecordingNetworkControl, RecordingPolicyEngine};
use databox_credentials::RootCa;
use databox_lifecycle::{EngineContext, EngineSettings, Orchestrator};
use databox_network::{RetryPolicy, TopologySettings};
use databox_state::StateStore;
use serde_json::{Value, json};
use tower::ServiceExt;

async fn app() -> (Router, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed_container("databox-network", &[]);

    let fast = RetryPolicy::fixed(2, Duration::from_millis(1));
    let settings = EngineSettings {
        topology: TopologySettings {
            attach_retry: fast,
            connect_retry: fast,
            removal_retry: fast,
            privileged_retry: fast,
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = Orchestrator::new(EngineContext {
        backend: backend.clone(),
        policy: Arc::new(RecordingPolicyEngine::new()),
        network_control: Arc::new(RecordingNetworkControl::new()),
        minter: Arc::new(RootCa::generate("Databox Test Root").unwrap()),
        store: StateStore::open_in_memory().unwrap(),
        settings,
    });
    engine.bootstrap().await.unwrap();

    (build_router(Arc::new(engine)), backend)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn weather() -> Value {
    json!({
        "name": "weather",
        "databox-type": "driver",
        "resource-requirements": { "store": "store-json" }
    })
}

#[tokio::test]
async fn install_list_and_uninstall() {
    let (app, backend) = app().await;

    let (status, body) = send(&app, "POST", "/api/v1/workloads", Some(weather())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["services"], json!(["weather", "weather-store-json"]));
    assert_eq!(body["data"]["failures"], json!([]));

    let (status, body) = send(&app, "GET", "/api/v1/workloads", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/api/v1/workloads?type=store", None).await;
    assert_eq!(body["data"][0]["name"], "weather-store-json");

    let (_, body) = send(&app, "GET", "/api/v1/manifests", None).await;
    assert_eq!(body["data"][0]["name"], "weather");

    let (_, body) = send(&app, "GET", "/api/v1/phases", None).await;
    assert_eq!(body["data"]["weather"], "running");

    let (status, body) = send(&app, "DELETE", "/api/v1/workloads/weather", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"], json!(["weather", "weather-store-json"]));
    assert_eq!(body["data"]["network"]["outcome"], "removed");
    assert!(backend.service_names().is_empty());

    let (_, body) = send(&app, "GET", "/api/v1/manifests", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn invalid_manifest_is_a_bad_request() {
    let (app, backend) = app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/workloads",
        Some(json!({ "name": "mystery" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("mystery"));
    assert!(backend.service_names().is_empty());
}

#[tokio::test]
async fn duplicate_install_conflicts() {
    let (app, _) = app().await;
    send(&app, "POST", "/api/v1/workloads", Some(weather())).await;

    let (status, _) = send(&app, "POST", "/api/v1/workloads", Some(weather())).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_workload_is_not_found() {
    let (app, _) = app().await;

    let (status, body) = send(&app, "DELETE", "/api/v1/workloads/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "workload ghost is not installed");

    let (status, body) = send(&app, "GET", "/api/v1/workloads/ghost/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn restart_reports_replaced_containers() {
    let (app, _) = app().await;
    send(
        &app,
        "POST",
        "/api/v1/workloads",
        Some(json!({ "name": "clock", "databox-type": "driver" })),
    )
    .await;

    let (status, body) = send(&app, "POST", "/api/v1/workloads/clock/restart", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["removed"].as_array().unwrap().len(), 1);

    let (_, body) = send(&app, "GET", "/api/v1/workloads/clock/tasks", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/api/v1/containers", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["state"], "running");
}
