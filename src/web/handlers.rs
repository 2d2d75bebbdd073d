use std::sync::Arc;

use axum::{Json, extract::State, response::Redirect};
use serde::Serialize;

use crate::{
    app_state::AppState, core::state::ServerStatus, session::registry::SessionSummary,
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn root() -> Redirect {
    Redirect::to("/static/index.html")
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<ServerStatus> {
    Json(state.status().await)
}

pub async fn sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionSummary>> {
    Json(state.registry.summaries().await)
}
