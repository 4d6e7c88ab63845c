use crate::server::SharedState;
use axum::{extract::State, response::IntoResponse, response::Json};

pub async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    state.metrics.record_request("/status");
    Json(state.controller.board().snapshot())
}
