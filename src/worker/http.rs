//! HTTP endpoints of the reference worker

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::Error;
use crate::coordinator::agent_client::{
    AgentErrorBody, CheckConsistencyRequest, CheckConsistencyResponse, CHECK_CONSISTENCY_PATH,
};
use crate::coordinator::catalog::TabletId;
use crate::worker::store::{ReplicaData, ReplicaStore};
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;

/// Largest replica upload accepted on `PUT /api/tablets/:tablet_id`.
pub const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct WorkerState {
    pub store: Arc<ReplicaStore>,
    pub worker_id: String,
}

pub fn create_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(CHECK_CONSISTENCY_PATH, post(check_consistency))
        .route(
            "/api/tablets/:tablet_id",
            put(load_tablet).delete(drop_tablet),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .with_state(state)
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, axum::Json(AgentErrorBody { error })).into_response()
}

async fn health(State(state): State<WorkerState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "worker_id": state.worker_id,
        "tablets": state.store.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn check_consistency(
    State(state): State<WorkerState>,
    payload: Result<axum::Json<CheckConsistencyRequest>, JsonRejection>,
) -> Response {
    let axum::Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    match state
        .store
        .checksum(req.tablet_id, req.schema_hash, req.version)
    {
        Ok(checksum) => {
            tracing::debug!(
                "Checksum of tablet {} at version {}: {:016x}",
                req.tablet_id,
                req.version,
                checksum
            );
            (StatusCode::OK, axum::Json(CheckConsistencyResponse { checksum })).into_response()
        }
        Err(e) => {
            tracing::warn!("Consistency request for tablet {} failed: {}", req.tablet_id, e);
            error_response(e.to_http_status(), e.to_string())
        }
    }
}

async fn load_tablet(
    State(state): State<WorkerState>,
    Path(tablet_id): Path<TabletId>,
    payload: Result<axum::Json<ReplicaData>, JsonRejection>,
) -> Response {
    let axum::Json(data) = match payload {
        Ok(data) => data,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let version = data.version;
    let rows = state.store.load(tablet_id, data);
    tracing::info!(
        "Loaded tablet {} at version {} ({} rows)",
        tablet_id,
        version,
        rows
    );
    (
        StatusCode::OK,
        axum::Json(json!({ "status": "ok", "tablet_id": tablet_id, "rows": rows })),
    )
        .into_response()
}

async fn drop_tablet(State(state): State<WorkerState>, Path(tablet_id): Path<TabletId>) -> Response {
    if state.store.remove(tablet_id) {
        (StatusCode::OK, axum::Json(json!({ "status": "ok" }))).into_response()
    } else {
        let e = Error::TabletNotFound(tablet_id);
        error_response(e.to_http_status(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(WorkerState {
            store: Arc::new(ReplicaStore::new()),
            worker_id: "w-1".into(),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_then_check() {
        let app = router();
        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/api/tablets/3",
                json!({"schema_hash": 9, "version": 2, "rows": [{"version": 1, "key": "a", "value": "b"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request(
                "POST",
                CHECK_CONSISTENCY_PATH,
                json!({"tablet_id": 3, "schema_hash": 9, "version": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_json(response).await["checksum"].is_u64());
    }

    #[tokio::test]
    async fn test_unknown_tablet_is_an_error_body() {
        let response = router()
            .oneshot(json_request(
                "POST",
                CHECK_CONSISTENCY_PATH,
                json!({"tablet_id": 3, "schema_hash": 9, "version": 2}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_json(response).await["error"]
            .as_str()
            .unwrap()
            .contains("Tablet not found"));
    }
}
