pub mod chat;
pub mod connectors;
pub mod documents;
pub mod jobs;
pub mod sessions;
pub mod settings;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub(super) fn error_response(status: StatusCode, error: impl std::fmt::Display) -> Response {
    (
        status,
        Json(serde_json::json!({ "success": false, "error": error.to_string() })),
    )
        .into_response()
}

pub async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
