//! Admin HTTP API for the coordinator
//!
//! Membership changes arrive as [`AlterClause`] JSON on `/admin/system`;
//! consistency checks can be run on demand and their history inspected.
//! Errors are rendered as `{"error": message}` with the status from
//! [`Error::to_http_status`].

use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, NodeState};
use crate::coordinator::agent_client::ConsistencyAgent;
use crate::coordinator::catalog::{TableId, TabletId, Version};
use crate::coordinator::clause::AlterClause;
use crate::coordinator::registry::{NodeId, NodeRole};
use crate::coordinator::server::CoordinatorContext;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub type CoordState<C> = Arc<CoordinatorContext<C>>;

const DEFAULT_HISTORY_LIMIT: usize = 100;

pub fn create_router<C: ConsistencyAgent>(state: CoordState<C>) -> Router {
    Router::new()
        .route("/health", get(health::<C>))
        // Membership
        .route("/admin/system", post(alter_system::<C>))
        .route("/admin/nodes", get(list_nodes::<C>))
        .route("/admin/nodes/:id", get(get_node::<C>))
        .route("/admin/nodes/:id/state", put(set_node_state::<C>))
        // Consistency
        .route(
            "/admin/consistency/tablets/:tablet_id",
            post(check_tablet::<C>),
        )
        .route(
            "/admin/consistency/tables/:table_id",
            post(check_table::<C>),
        )
        .route(
            "/admin/consistency/history",
            get(consistency_history::<C>),
        )
        .layer(axum::middleware::from_fn(request_tracing_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: Error) -> Response {
    let status = e.to_http_status();
    if status.is_server_error() {
        tracing::error!("Admin request failed: {}", e);
    }
    (status, axum::Json(json!({ "error": e.to_string() }))).into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    (
        StatusCode::BAD_REQUEST,
        axum::Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

/// Liveness plus a few counters.
async fn health<C: ConsistencyAgent>(State(state): State<CoordState<C>>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "nodes": state.registry.len(),
        "tablets": state.catalog.tablet_ids().len(),
        "in_flight_tasks": state.dispatcher.in_flight(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Apply one `ALTER SYSTEM` clause.
async fn alter_system<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    payload: Result<axum::Json<AlterClause>, JsonRejection>,
) -> Response {
    let axum::Json(clause) = match payload {
        Ok(clause) => clause,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.registry.apply(&clause) {
        Ok(node_ids) => (
            StatusCode::OK,
            axum::Json(json!({ "status": "ok", "node_ids": node_ids })),
        )
            .into_response(),
        Err(e) if e.is_membership_error() => {
            tracing::warn!("Rejected alter clause {:?}: {}", clause, e);
            error_response(e)
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct NodesQuery {
    role: Option<String>,
}

async fn list_nodes<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Query(query): Query<NodesQuery>,
) -> Response {
    let nodes = match query.role.as_deref() {
        Some(role) => match role.parse::<NodeRole>() {
            Ok(role) => state.registry.lookup(role),
            Err(e) => return error_response(e),
        },
        None => state.registry.all(),
    };
    (StatusCode::OK, axum::Json(json!({ "nodes": nodes }))).into_response()
}

async fn get_node<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Path(id): Path<u64>,
) -> Response {
    match state.registry.resolve(NodeId(id)) {
        Ok(node) => (StatusCode::OK, axum::Json(node)).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct SetStateRequest {
    state: NodeState,
}

async fn set_node_state<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Path(id): Path<u64>,
    payload: Result<axum::Json<SetStateRequest>, JsonRejection>,
) -> Response {
    let axum::Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return rejection_response(rejection),
    };
    match state.registry.set_state(NodeId(id), req.state) {
        Ok(()) => (
            StatusCode::OK,
            axum::Json(json!({ "status": "ok", "state": req.state })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct CheckTabletRequest {
    version: Version,
    /// Overrides the configured check deadline.
    deadline_ms: Option<u64>,
}

async fn check_tablet<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Path(tablet_id): Path<TabletId>,
    payload: Result<axum::Json<CheckTabletRequest>, JsonRejection>,
) -> Response {
    let axum::Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return rejection_response(rejection),
    };
    let budget = req
        .deadline_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.config.check_deadline());
    let deadline = tokio::time::Instant::now() + budget;

    match state
        .checker
        .check_tablet_with_deadline(tablet_id, req.version, deadline)
        .await
    {
        Ok(report) => {
            state.history.record(report.clone());
            (StatusCode::OK, axum::Json(report)).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct CheckTableRequest {
    version: Version,
}

async fn check_table<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Path(table_id): Path<TableId>,
    payload: Result<axum::Json<CheckTableRequest>, JsonRejection>,
) -> Response {
    let axum::Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return rejection_response(rejection),
    };
    match state.checker.check_table(table_id, req.version).await {
        Ok(checks) => {
            let passed = checks
                .iter()
                .filter(|c| matches!(c, crate::ops::TabletCheck::Checked(r) if r.is_pass()))
                .count();
            (
                StatusCode::OK,
                axum::Json(json!({
                    "table_id": table_id,
                    "version": req.version,
                    "tablets": checks.len(),
                    "passed": passed,
                    "checks": checks,
                })),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    tablet_id: Option<TabletId>,
}

async fn consistency_history<C: ConsistencyAgent>(
    State(state): State<CoordState<C>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let reports = match query.tablet_id {
        Some(tablet_id) => {
            let mut reports = state.history.for_tablet(tablet_id);
            reports.truncate(limit);
            reports
        }
        None => state.history.recent(limit),
    };
    axum::Json(json!({ "reports": reports }))
}
