use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use super::super::AppState;
use super::error_response;
use crate::core::settings::{EngineSettings, SettingsPatch};

#[derive(Serialize)]
pub struct SettingsView {
    #[serde(flatten)]
    settings: EngineSettings,
    version: u64,
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> {
    let (settings, version) = state.services.engine.settings().snapshot().await;
    Json(SettingsView { settings, version })
}

pub async fn update_settings(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Response {
    match state.services.engine.settings().update(patch).await {
        Ok((settings, version)) => Json(SettingsView { settings, version }).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}
