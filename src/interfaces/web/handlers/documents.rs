use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::info;

use super::super::AppState;
use super::error_response;
use crate::connectors::ConnectorError;

#[derive(Debug, Deserialize)]
pub struct IndexRequest {
    label: String,
    #[serde(alias = "text")]
    content: String,
}

fn connector_error(e: ConnectorError) -> Response {
    let status = match e {
        ConnectorError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, e)
}

pub async fn index_document(
    State(state): State<AppState>,
    Json(payload): Json<IndexRequest>,
) -> Response {
    let documents = &state.services.connectors.documents;
    match documents
        .index_document(&payload.label, &payload.content)
        .await
    {
        Ok(doc) => {
            info!("Indexed document '{}' ({} chunks)", doc.label, doc.chunks);
            Json(serde_json::json!({ "success": true, "document": doc })).into_response()
        }
        Err(e) => connector_error(e),
    }
}

pub async fn list_documents(State(state): State<AppState>) -> Response {
    match state.services.connectors.documents.list_documents().await {
        Ok(docs) => Json(serde_json::json!({ "success": true, "documents": docs })).into_response(),
        Err(e) => connector_error(e),
    }
}

pub async fn delete_document(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    match state.services.connectors.documents.delete_document(&id).await {
        Ok(true) => Json(serde_json::json!({ "success": true })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("Document not found: {id}")),
        Err(e) => connector_error(e),
    }
}
