//! Admin HTTP API driven through the router

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::Arc;
use tabletd::common::CoordinatorConfig;
use tabletd::coordinator::agent_client::{
    AgentClient, CheckConsistencyRequest, CheckConsistencyResponse, TransportError,
};
use tabletd::coordinator::catalog::InMemoryCatalog;
use tabletd::coordinator::http::create_router;
use tabletd::coordinator::{CoordinatorContext, NodeAddress, NodeId, NodeRegistry};
use tower::ServiceExt;

/// Every replica answers with the same checksum.
struct AgreeingAgent;

impl AgentClient for AgreeingAgent {
    type Request = CheckConsistencyRequest;
    type Response = CheckConsistencyResponse;

    fn call<'a>(
        &'a self,
        _addr: &'a NodeAddress,
        request: &'a CheckConsistencyRequest,
    ) -> BoxFuture<'a, Result<CheckConsistencyResponse, TransportError>> {
        Box::pin(async move {
            Ok(CheckConsistencyResponse {
                checksum: request.tablet_id * 31,
            })
        })
    }
}

fn app() -> (Router, Arc<InMemoryCatalog>) {
    let catalog = Arc::new(InMemoryCatalog::new());
    let context = CoordinatorContext::new(
        CoordinatorConfig::default(),
        Arc::new(NodeRegistry::default()),
        catalog.clone(),
        Arc::new(AgreeingAgent),
    );
    (create_router(Arc::new(context)), catalog)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_add_list_and_drop_nodes() {
    let (app, _) = app();

    let (status, body) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({
            "type": "add_nodes",
            "role": "backend",
            "host_ports": ["10.0.0.1:9060", "10.0.0.2:9060"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_ids"].as_array().unwrap().len(), 2);

    let (status, body) = call(&app, "GET", "/admin/nodes?role=backend", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["nodes"][0]["host"], "10.0.0.1");

    let (_, body) = call(&app, "GET", "/admin/nodes?role=frontend", None).await;
    assert!(body["nodes"].as_array().unwrap().is_empty());

    let (status, _) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({
            "type": "drop_nodes",
            "role": "backend",
            "host_ports": ["10.0.0.1:9060"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/admin/nodes", None).await;
    assert_eq!(body["nodes"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_membership_errors_render_as_json() {
    let (app, _) = app();
    let add = json!({
        "type": "add_nodes",
        "role": "backend",
        "host_ports": ["10.0.0.1:9060"]
    });
    call(&app, "POST", "/admin/system", Some(add.clone())).await;

    let (status, body) = call(&app, "POST", "/admin/system", Some(add)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("already exists"));

    let (status, body) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({"type": "add_nodes", "role": "backend", "host_ports": ["10.0.0.1:0"]})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("host or port is wrong"));

    let (status, body) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({
            "type": "modify_host",
            "role": "backend",
            "src_host": "10.0.0.1",
            "dest_host": "10.0.0.9"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("ip to ip"));

    let (status, body) = call(&app, "POST", "/admin/system", Some(json!({"type": "nope"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = call(&app, "GET", "/admin/nodes?role=wizard", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("unknown node role"));
}

#[tokio::test]
async fn test_get_and_update_node() {
    let (app, _) = app();
    let (_, body) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({"type": "add_nodes", "role": "compute", "host_ports": ["10.0.0.3:9060"]})),
    )
    .await;
    let id = body["node_ids"][0].as_u64().unwrap();

    let (status, node) = call(&app, "GET", &format!("/admin/nodes/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(node["role"], "compute");
    assert_eq!(node["state"], "alive");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/admin/nodes/{}/state", id),
        Some(json!({"state": "dead"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, node) = call(&app, "GET", &format!("/admin/nodes/{}", id), None).await;
    assert_eq!(node["state"], "dead");

    let (status, body) = call(&app, "GET", "/admin/nodes/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_brokers_round_trip() {
    let (app, _) = app();
    let (status, _) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({
            "type": "modify_broker",
            "name": "hdfs",
            "op": {"op": "add", "host_ports": ["10.0.1.1:8000", "10.0.1.2:8000"]}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&app, "GET", "/admin/nodes?role=broker", None).await;
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["nodes"][0]["broker_name"], "hdfs");

    let (status, _) = call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({"type": "modify_broker", "name": "hdfs", "op": {"op": "drop_all"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = call(&app, "GET", "/admin/nodes?role=broker", None).await;
    assert!(body["nodes"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_check_tablet_and_history() {
    let (app, catalog) = app();
    catalog.put_tablet(1, 500, [(NodeId(1), 3, 9), (NodeId(2), 3, 9)]);
    catalog.put_tablet(1, 501, [(NodeId(1), 3, 9)]);
    call(
        &app,
        "POST",
        "/admin/system",
        Some(json!({"type": "add_nodes", "role": "backend", "host_ports": ["10.0.0.1:9060", "10.0.0.2:9060"]})),
    )
    .await;

    let (status, report) = call(
        &app,
        "POST",
        "/admin/consistency/tablets/500",
        Some(json!({"version": 9, "deadline_ms": 2000})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "consistent");
    assert_eq!(report["majority_checksum"], 500 * 31);

    let (status, body) = call(
        &app,
        "POST",
        "/admin/consistency/tablets/501",
        Some(json!({"version": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("Insufficient replicas"));

    let (status, _) = call(
        &app,
        "POST",
        "/admin/consistency/tablets/404",
        Some(json!({"version": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        "POST",
        "/admin/consistency/tables/1",
        Some(json!({"version": 9})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tablets"], 2);
    assert_eq!(body["passed"], 1);

    let (status, body) = call(&app, "GET", "/admin/consistency/history?tablet_id=500", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reports"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_health_and_request_id() {
    let (app, _) = app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("X-Request-ID", "req-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["X-Request-ID"], "req-42");

    let (_, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["in_flight_tasks"], 0);
}
