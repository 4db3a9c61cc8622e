use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{
    self, chat, connectors, documents, jobs, sessions, settings,
};

fn build_localhost_cors(api_port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", api_port),
        format!("http://localhost:{}", api_port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_endpoint))
        .route("/api/chat", post(chat::chat_endpoint))
        .route("/api/ws", get(chat::ws_endpoint))
        .route(
            "/api/sessions",
            get(sessions::list_sessions).post(sessions::create_session),
        )
        .route(
            "/api/sessions/{id}",
            delete(sessions::delete_session).patch(sessions::rename_session),
        )
        .route(
            "/api/sessions/{id}/messages",
            get(sessions::get_session_messages),
        )
        .route(
            "/api/settings",
            get(settings::get_settings).post(settings::update_settings),
        )
        .route(
            "/api/connectors/status",
            get(connectors::connectors_status),
        )
        .route(
            "/api/documents",
            get(documents::list_documents).post(documents::index_document),
        )
        .route("/api/documents/{id}", delete(documents::delete_document))
        .route("/api/jobs/{kind}/start", post(jobs::start_job))
        .route("/api/jobs/{kind}/status", get(jobs::job_status))
        .route("/api/datasets/{target}", get(jobs::dataset_preview))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.api_port))
        .with_state(state)
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
        ),
    );
    response
}
