use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::{AppState, sse_events};
use super::error_response;
use crate::core::jobs::training::Target;
use crate::core::jobs::{JobError, JobKind};

const PREVIEW_SAMPLES: usize = 5;

pub async fn start_job(Path(kind): Path<String>, State(state): State<AppState>) -> Response {
    let kind = match JobKind::parse(&kind) {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let toolchain = &state.services.toolchain;
    match state
        .services
        .jobs
        .start(kind, toolchain.operation(kind), toolchain.fallback(kind))
    {
        Ok(events) => sse_events(events).into_response(),
        Err(e @ JobError::AlreadyRunning(_)) => error_response(StatusCode::CONFLICT, e),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn job_status(Path(kind): Path<String>, State(state): State<AppState>) -> Response {
    let kind = match JobKind::parse(&kind) {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    let registry = state.services.jobs.registry();
    let job = registry.get(kind);
    let job_state = state.services.toolchain.status(registry, kind);
    Json(serde_json::json!({ "kind": job.kind, "state": job_state, "id": job.id }))
        .into_response()
}

pub async fn dataset_preview(
    Path(target): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let Some(target) = Target::parse(&target) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown dataset: {target}"),
        );
    };
    let toolchain = state.services.toolchain.clone();
    let read = tokio::task::spawn_blocking(move || {
        (
            toolchain.dataset_count(target),
            toolchain.preview_dataset(target, PREVIEW_SAMPLES),
        )
    })
    .await;
    match read {
        Ok((count, preview)) => Json(serde_json::json!({
            "target": target.as_str(),
            "count": count,
            "preview": preview,
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
