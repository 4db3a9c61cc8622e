use axum::{Json, extract::State};

use super::super::AppState;

/// Inference engine health plus per-connector availability.
pub async fn connectors_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let connectors = &state.services.connectors;
    let (engine, messages, mail, documents) = tokio::join!(
        state.services.engine.health(),
        connectors.messages.available(),
        connectors.mail.available(),
        connectors.documents.list_documents(),
    );

    let documents = match documents {
        Ok(docs) => serde_json::json!({ "available": true, "count": docs.len() }),
        Err(e) => serde_json::json!({ "available": false, "count": 0, "error": e.to_string() }),
    };

    Json(serde_json::json!({
        "engine": engine,
        "messages": { "available": messages },
        "mail": { "available": mail },
        "documents": documents,
    }))
}
