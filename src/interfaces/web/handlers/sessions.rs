use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use super::super::AppState;
use super::error_response;

#[derive(Debug, Default, Deserialize)]
pub struct SessionTitle {
    #[serde(default)]
    title: Option<String>,
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    match state.services.conversation.sessions().list_sessions().await {
        Ok(sessions) => {
            Json(serde_json::json!({ "success": true, "sessions": sessions })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

// The body is optional, so it is parsed by hand instead of through `Json`.
pub async fn create_session(State(state): State<AppState>, body: Bytes) -> Response {
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        SessionTitle::default()
    } else {
        match serde_json::from_slice::<SessionTitle>(&body) {
            Ok(p) => p,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
        }
    };

    let sessions = state.services.conversation.sessions();
    match sessions.create_session(payload.title.as_deref()).await {
        Ok(id) => Json(serde_json::json!({ "success": true, "id": id })).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn get_session_messages(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    let sessions = state.services.conversation.sessions();
    match sessions.exists(&id).await {
        Ok(true) => {}
        Ok(false) => {
            return error_response(StatusCode::NOT_FOUND, format!("Session not found: {id}"));
        }
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
    match sessions.history(&id).await {
        Ok(messages) => {
            Json(serde_json::json!({ "success": true, "messages": messages })).into_response()
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn rename_session(
    Path(id): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<SessionTitle>,
) -> Response {
    let Some(title) = payload.title.filter(|t| !t.trim().is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "title is required");
    };
    match state
        .services
        .conversation
        .sessions()
        .rename_session(&id, title.trim())
        .await
    {
        Ok(true) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Session not found: {id}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

pub async fn delete_session(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state
        .services
        .conversation
        .sessions()
        .delete_session(&id)
        .await
    {
        Ok(true) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Session not found: {id}")),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}
