//! The Action API: enqueue and status endpoints plus a health probe.
//!
//! No handler work happens on the request path; `POST /actions/run` only
//! validates, ledgers the request, and returns the run id.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use roadmap_actions::ActionRegistry;
use roadmap_db::Db;
use roadmap_ids::ActionRunId;
use roadmap_protocol::{
    ActionRequest, EnqueueResponse, ErrorBody, RunStatus, RunStatusResponse, Settings,
    SECRET_HEADER,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct ApiState {
    pub db: Db,
    pub registry: Arc<ActionRegistry>,
    pub settings: Arc<Settings>,
}

/// Build the router. Fails when the shared secret is empty: an Action API
/// without a credential would accept writes from anyone.
pub fn build_router(state: ApiState) -> anyhow::Result<Router> {
    if state.settings.shared_secret.is_empty() {
        anyhow::bail!("refusing to serve with an empty ROADMAP_AI_SECRET");
    }
    Ok(Router::new()
        .route("/actions/run", post(enqueue_action))
        .route("/actions/run/:run_id", get(run_status))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Serve until the process is terminated.
pub async fn serve(state: ApiState) -> anyhow::Result<()> {
    let bind_addr = state.settings.api_bind_addr.clone();
    let router = build_router(state)?;
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Action API listening on {bind_addr}");
    axum::serve(listener, router).await?;
    Ok(())
}

async fn enqueue_action(
    State(state): State<ApiState>,
    headers: HeaderMap,
    body: Result<Json<ActionRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    if let Err(response) = check_secret(&state, &headers) {
        return response;
    }

    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody::with_detail("invalid payload", rejection.to_string())),
            )
                .into_response();
        }
    };

    if let Err(err) = request.validate_shape() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::with_detail("invalid payload", err.to_string())),
        )
            .into_response();
    }
    if !state.registry.contains(&request.action) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorBody::with_detail(
                "invalid payload",
                format!("unknown action: {}", request.action),
            )),
        )
            .into_response();
    }

    let run_id = ActionRunId::mint(Utc::now());
    let payload = match serde_json::to_string(&request) {
        Ok(payload) => payload,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::with_detail("internal", err.to_string())),
            )
                .into_response();
        }
    };
    let requested_by = serde_json::to_string(&request.requested_by).ok();

    if let Err(err) = state
        .db
        .ledger()
        .enqueue(&run_id, &request.action, &payload, requested_by.as_deref())
        .await
    {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody::with_detail("internal", err.to_string())),
        )
            .into_response();
    }

    info!("Enqueued {} as {}", request.action, run_id);
    (
        StatusCode::OK,
        Json(EnqueueResponse {
            run_id,
            status: RunStatus::Queued,
        }),
    )
        .into_response()
}

async fn run_status(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(run_id): Path<String>,
) -> Response {
    if let Err(response) = check_secret(&state, &headers) {
        return response;
    }

    let run = match state.db.ledger().get(&run_id).await {
        Ok(run) => run,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::with_detail("internal", err.to_string())),
            )
                .into_response();
        }
    };
    let Some(run) = run else {
        return (
            StatusCode::NOT_FOUND,
            Json(ErrorBody::new("run not found")),
        )
            .into_response();
    };

    let parsed_run_id = match ActionRunId::parse(&run.run_id) {
        Ok(id) => id,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody::with_detail("internal", err.to_string())),
            )
                .into_response();
        }
    };
    let result = run
        .result_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());
    let response = RunStatusResponse {
        run_id: parsed_run_id,
        status: run.status.to_status(),
        started_at: run.started_at,
        finished_at: run.finished_at,
        result,
        error_text: run.error_text,
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn healthz(State(state): State<ApiState>) -> Response {
    match state.db.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "degraded", "detail": err.to_string()})),
        )
            .into_response(),
    }
}

/// Shared-secret gate. Comparison is constant-time over the full header
/// value so timing does not leak prefix matches.
fn check_secret(state: &ApiState, headers: &HeaderMap) -> Result<(), Response> {
    let provided = headers
        .get(SECRET_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq(provided.as_bytes(), state.settings.shared_secret.as_bytes()) {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new("unauthorized")),
        )
            .into_response());
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secre"));
        assert!(constant_time_eq(b"", b""));
    }
}
