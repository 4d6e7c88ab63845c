use crate::{controller::ControllerError, server::SharedState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::instrument;

#[derive(Serialize)]
pub struct Started {
    session_id: String,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        let status = match self {
            ControllerError::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ControllerError::InvalidEndpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

#[instrument(skip(state))]
pub async fn start(State(state): State<SharedState>) -> Result<Json<Started>, ControllerError> {
    state.metrics.record_request("/start");
    let session_id = state.controller.start().await?;
    Ok(Json(Started { session_id }))
}

#[instrument(skip(state))]
pub async fn stop(State(state): State<SharedState>) -> StatusCode {
    state.metrics.record_request("/stop");
    state.controller.stop().await;
    StatusCode::NO_CONTENT
}
