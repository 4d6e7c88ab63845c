use crate::server::SharedState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

/// Session transitions as server-sent events. Lagging viewers simply miss
/// intermediate events; `/status` always has the latest snapshot.
pub async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    state.metrics.record_request("/events");
    let stream = BroadcastStream::new(state.controller.board().subscribe()).filter_map(
        |event| async move {
            let event = event.ok()?;
            Event::default().json_data(&event).ok().map(Ok)
        },
    );
    Sse::new(stream).keep_alive(KeepAlive::default())
}
