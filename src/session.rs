//! One streaming session against the detection backend.
//!
//! A session walks `Connecting -> Open -> (Closing -> Closed) | Failed` and
//! never reopens. Everything it does happens on a single task: the refresh
//! ticker and the socket are multiplexed with `select!`, so the tick-driven
//! send and the receive handler never overlap. Frames are never queued; a slow
//! socket just means missed ticks are skipped.

use crate::detection::DetectionResult;
use crate::overlay::{OverlayRenderer, OverlaySurface};
use crate::sampler::FrameSampler;
use crate::status::{SocketState, StatusBoard};
use crate::telemetry::Metrics;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};
use tracing::instrument;
use url::Url;

/// How long a local stop waits for the backend to acknowledge the Close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport failure: {0}")]
    TransportFailure(#[from] WsError),
    #[error("Malformed detection result: {0}")]
    MalformedResult(#[from] serde_json::Error),
}

/// Caller-chosen token the backend keys its per-client tracking state on.
pub fn new_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{}-{:04x}", millis, rand::random::<u16>())
}

pub struct StreamSession {
    id: String,
    state: SocketState,
    armed: bool,
    sampler: FrameSampler,
    renderer: OverlayRenderer,
    overlay: Arc<Mutex<OverlaySurface>>,
    board: Arc<StatusBoard>,
    metrics: Arc<Metrics>,
}

impl StreamSession {
    pub fn new(
        id: String,
        sampler: FrameSampler,
        overlay: Arc<Mutex<OverlaySurface>>,
        board: Arc<StatusBoard>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let session = Self {
            id,
            state: SocketState::Connecting,
            armed: false,
            sampler,
            renderer: OverlayRenderer::new(),
            overlay,
            board,
            metrics,
        };
        session.board.set_socket_state(&session.id, session.state);
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SocketState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    fn transition(&mut self, state: SocketState) {
        if self.state == state {
            return;
        }
        tracing::info!(session_id = %self.id, "Socket {:?} -> {:?}", self.state, state);
        self.state = state;
        self.board.set_socket_state(&self.id, state);
    }

    /// Handshake completed. This is the only place the sampling loop is armed.
    pub fn on_open(&mut self) {
        if self.state != SocketState::Connecting {
            return;
        }
        self.transition(SocketState::Open);
        self.armed = true;
    }

    /// One refresh tick. Returns the payload to send, if any.
    ///
    /// Never fails: a disarmed session, a socket that is no longer open, or a
    /// capture source without data all skip the tick.
    pub fn on_tick(&mut self) -> Option<String> {
        if !self.armed || self.state != SocketState::Open {
            return None;
        }

        let started = Instant::now();
        match self.sampler.sample() {
            Ok(Some(frame)) => {
                let payload = frame.to_data_url();
                self.metrics
                    .record_frame_encoded(started.elapsed().as_millis() as u64);
                Some(payload)
            }
            Ok(None) => {
                tracing::debug!(session_id = %self.id, "No frame buffered yet, skipping tick");
                self.metrics.record_tick_skipped();
                None
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, "Failed to sample frame: {:?}", e);
                self.metrics.record_tick_skipped();
                None
            }
        }
    }

    /// Applies one inbound message. A payload that does not parse fails the
    /// session; it is a backend contract violation, not something to skip.
    #[instrument(skip(self, payload), fields(session_id = %self.id))]
    pub fn on_message(&mut self, payload: &str) -> Result<(), SessionError> {
        let result = DetectionResult::from_json(payload)?;
        self.board.set_tally(result.total_vehicles);
        self.metrics.record_result(result.total_vehicles);

        let (width, height) = result.dimensions();
        let mut overlay = self.overlay.lock();
        if overlay.dimensions() != (width, height) {
            tracing::debug!("Resizing overlay to {}x{}", width, height);
            overlay.resize(width, height);
        }
        self.renderer.render(
            &mut overlay,
            &result.detections,
            result.line_y,
            width,
            height,
        );
        Ok(())
    }

    /// Local stop request: disarm right away, wait for the close to finish.
    pub fn begin_close(&mut self) {
        self.armed = false;
        if !self.state.is_terminal() {
            self.transition(SocketState::Closing);
        }
    }

    pub fn on_close(&mut self) {
        self.armed = false;
        if !self.state.is_terminal() {
            self.transition(SocketState::Closed);
        }
    }

    pub fn on_error(&mut self, error: &SessionError) {
        self.armed = false;
        if self.state.is_terminal() {
            return;
        }
        self.board.report_error(&self.id, error.to_string());
        self.transition(SocketState::Failed);
    }

    /// Drives the session until it is closed, fails, or `stop_rx` fires (or
    /// its sender goes away).
    pub async fn run(
        mut self,
        endpoint: Url,
        refresh: Duration,
        mut stop_rx: broadcast::Receiver<()>,
    ) -> Result<(), SessionError> {
        tracing::info!(session_id = %self.id, "Connecting to {}", endpoint);

        let ws_stream = tokio::select! {
            connected = connect_async(endpoint.as_str()) => match connected {
                Ok((ws_stream, _)) => ws_stream,
                Err(e) => {
                    let error = SessionError::from(e);
                    tracing::warn!(session_id = %self.id, "Handshake failed: {}", error);
                    self.on_error(&error);
                    return Err(error);
                }
            },
            _ = stop_rx.recv() => {
                tracing::info!(session_id = %self.id, "Stopped before the handshake completed");
                self.begin_close();
                self.on_close();
                return Ok(());
            }
        };

        self.on_open();
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        let mut ticker = interval(refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = stop_rx.recv() => {
                    self.begin_close();
                    close_sink(&self.id, &mut ws_tx).await;
                    let acknowledged = timeout(CLOSE_TIMEOUT, async {
                        // Results still in flight are dropped; the session no longer renders.
                        while let Some(Ok(message)) = ws_rx.next().await {
                            if let Message::Close(_) = message {
                                break;
                            }
                        }
                    })
                    .await;
                    if acknowledged.is_err() {
                        tracing::debug!(session_id = %self.id, "Backend did not acknowledge close");
                    }
                    self.on_close();
                    break Ok(());
                }

                message = ws_rx.next() => match message {
                    Some(Ok(Message::Text(payload))) => {
                        if let Err(e) = self.on_message(&payload) {
                            tracing::error!(session_id = %self.id, "{}", e);
                            self.on_error(&e);
                            close_sink(&self.id, &mut ws_tx).await;
                            break Err(e);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(session_id = %self.id, "Backend closed the socket: {:?}", frame);
                        self.on_close();
                        // Flushes the Close reply queued by the protocol layer.
                        close_sink(&self.id, &mut ws_tx).await;
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        let error = SessionError::from(e);
                        tracing::warn!(session_id = %self.id, "{}", error);
                        self.on_error(&error);
                        break Err(error);
                    }
                    None => {
                        tracing::info!(session_id = %self.id, "Socket stream ended");
                        self.on_close();
                        break Ok(());
                    }
                },

                _ = ticker.tick(), if self.armed => {
                    let Some(payload) = self.on_tick() else {
                        continue;
                    };
                    match ws_tx.send(Message::Text(payload)).await {
                        Ok(()) => self.metrics.record_frame_sent(),
                        Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                            tracing::debug!(session_id = %self.id, "Socket closed before send, dropping frame");
                            self.on_close();
                            break Ok(());
                        }
                        Err(e) => {
                            let error = SessionError::from(e);
                            tracing::warn!(session_id = %self.id, "{}", error);
                            self.on_error(&error);
                            break Err(error);
                        }
                    }
                }
            }
        };

        tracing::info!(session_id = %self.id, "Session ended in state {:?}", self.state);
        outcome
    }
}

/// Sends our Close frame, or the queued reply to the backend's, and flushes it.
async fn close_sink<S>(session_id: &str, sink: &mut S)
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    if let Err(e) = sink.close().await {
        tracing::debug!(session_id = %session_id, "Close handshake not completed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternCamera;
    use crate::display::VideoElement;
    use crate::overlay::DrawCommand;

    struct Fixture {
        session: StreamSession,
        overlay: Arc<Mutex<OverlaySurface>>,
        board: Arc<StatusBoard>,
    }

    fn fixture(warmup_frames: u32) -> Fixture {
        let video = Arc::new(VideoElement::new());
        video.attach(Box::new(TestPatternCamera::new(64, 48, warmup_frames)));
        let overlay = Arc::new(Mutex::new(OverlaySurface::new(64, 48)));
        let board = Arc::new(StatusBoard::new());
        let metrics = Arc::new(Metrics::new().unwrap());
        let sampler = FrameSampler::new(video, overlay.clone(), 50);
        let session = StreamSession::new(
            "test-session".to_string(),
            sampler,
            overlay.clone(),
            board.clone(),
            metrics,
        );
        Fixture {
            session,
            overlay,
            board,
        }
    }

    const RESULT: &str = r#"{
        "detections": [
            {"box": [10, 40, 60, 90], "confidence": 0.873, "class_name": "car", "track_id": 7},
            {"box": [100, 5, 140, 30], "confidence": 0.5, "class_name": "bus", "track_id": null}
        ],
        "total_vehicles": 5,
        "line_y": 160,
        "frame_width": 320,
        "frame_height": 240
    }"#;

    #[test]
    fn test_new_session_is_connecting_and_disarmed() {
        let mut fx = fixture(0);

        assert_eq!(fx.session.state(), SocketState::Connecting);
        assert!(!fx.session.is_armed());
        assert!(fx.session.on_tick().is_none());
    }

    #[test]
    fn test_sends_never_exceed_ticks_and_stop_after_close() {
        let mut fx = fixture(2);
        fx.session.on_open();

        let sent = (0..10).filter_map(|_| fx.session.on_tick()).count();
        assert_eq!(sent, 8);

        fx.session.on_close();
        let sent_after_close = (0..10).filter_map(|_| fx.session.on_tick()).count();
        assert_eq!(sent_after_close, 0);
        assert_eq!(fx.session.state(), SocketState::Closed);
    }

    #[test]
    fn test_tick_payload_is_jpeg_data_url() {
        let mut fx = fixture(0);
        fx.session.on_open();

        let payload = fx.session.on_tick().unwrap();

        assert!(payload.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_tick_after_begin_close_is_skipped() {
        let mut fx = fixture(0);
        fx.session.on_open();

        fx.session.begin_close();

        assert_eq!(fx.session.state(), SocketState::Closing);
        assert!(fx.session.on_tick().is_none());
    }

    #[test]
    fn test_message_updates_tally_and_resizes_overlay() {
        let mut fx = fixture(0);
        fx.session.on_open();

        fx.session.on_message(RESULT).unwrap();

        assert_eq!(fx.board.total_vehicles(), 5);
        let overlay = fx.overlay.lock();
        assert_eq!(overlay.dimensions(), (320, 240));
        assert_eq!(overlay.commands().len(), 5);
        assert!(matches!(
            &overlay.commands()[2],
            DrawCommand::Text { text, .. } if text == "car 87% ID: 7"
        ));
    }

    #[test]
    fn test_repeated_result_is_idempotent() {
        let mut fx = fixture(0);
        fx.session.on_open();

        fx.session.on_message(RESULT).unwrap();
        let first = fx.overlay.lock().clone();
        fx.session.on_message(RESULT).unwrap();

        assert_eq!(*fx.overlay.lock(), first);
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        let mut fx = fixture(0);
        fx.session.on_open();

        let result = fx.session.on_message(r#"{"detections": "nope"}"#);

        assert!(matches!(result, Err(SessionError::MalformedResult(_))));
    }

    #[test]
    fn test_oversized_result_fails_without_touching_overlay() {
        let mut fx = fixture(0);
        fx.session.on_open();
        let payload = r#"{"detections": [], "total_vehicles": 9, "line_y": 0,
            "frame_width": 4294967295, "frame_height": 4294967295}"#;

        let result = fx.session.on_message(payload);

        assert!(matches!(result, Err(SessionError::MalformedResult(_))));
        assert_eq!(fx.overlay.lock().dimensions(), (64, 48));
        assert_eq!(fx.board.total_vehicles(), 0);
        let frame = fx.session.on_tick().unwrap();
        assert!(frame.starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_zero_sized_result_is_malformed() {
        let mut fx = fixture(0);
        fx.session.on_open();
        fx.session.on_message(RESULT).unwrap();
        let payload = r#"{"detections": [], "total_vehicles": 1, "line_y": 0,
            "frame_width": 0, "frame_height": 240}"#;

        let result = fx.session.on_message(payload);

        assert!(matches!(result, Err(SessionError::MalformedResult(_))));
        assert_eq!(fx.overlay.lock().dimensions(), (320, 240));
    }

    #[test]
    fn test_error_after_close_keeps_closed_state() {
        let mut fx = fixture(0);
        fx.session.on_open();
        fx.session.on_close();

        let error = SessionError::TransportFailure(WsError::ConnectionClosed);
        fx.session.on_error(&error);

        assert_eq!(fx.session.state(), SocketState::Closed);
        assert!(fx.board.snapshot().last_error.is_none());
    }

    #[test]
    fn test_open_is_ignored_once_failed() {
        let mut fx = fixture(0);
        let error = SessionError::TransportFailure(WsError::ConnectionClosed);
        fx.session.on_error(&error);

        fx.session.on_open();

        assert_eq!(fx.session.state(), SocketState::Failed);
        assert!(!fx.session.is_armed());
    }

    #[test]
    fn test_session_ids_are_distinct() {
        assert_ne!(new_session_id(), new_session_id());
    }

    #[tokio::test]
    async fn test_run_fails_when_backend_unreachable() {
        let fx = fixture(0);
        let board = fx.board.clone();
        let (_stop_tx, stop_rx) = broadcast::channel(1);
        let endpoint = Url::parse("ws://127.0.0.1:9/ws?client_id=x").unwrap();

        let result = fx
            .session
            .run(endpoint, Duration::from_millis(10), stop_rx)
            .await;

        assert!(matches!(result, Err(SessionError::TransportFailure(_))));
        assert_eq!(board.snapshot().socket_state, Some(SocketState::Failed));
    }
}
