mod control;
mod events;
mod health;
mod metrics;
mod status;
mod video_feed;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health::healthcheck))
        .route("/status", get(status::status))
        .route("/start", post(control::start))
        .route("/stop", post(control::stop))
        .route("/events", get(events::events))
        .route("/video_feed", get(video_feed::video_feed))
        .route("/metrics", get(metrics::metrics_handler))
}
