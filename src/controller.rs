//! Top-level orchestration: owns the capture device for the lifetime of one
//! session and guarantees it is released, whichever way the session ends.

use crate::camera::{CameraError, DeviceProvider};
use crate::config::BackendConfig;
use crate::display::VideoElement;
use crate::overlay::OverlaySurface;
use crate::sampler::FrameSampler;
use crate::session::{new_session_id, SessionError, StreamSession};
use crate::status::{StatusBoard, StreamStatus};
use crate::telemetry::Metrics;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::{sync::broadcast, task::JoinHandle};

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(#[from] CameraError),
    #[error("Invalid backend endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub backend: BackendConfig,
    pub refresh_interval: Duration,
    pub jpeg_quality: u8,
}

/// State shared with the session task and the display server.
pub struct Shared {
    pub video: Arc<VideoElement>,
    pub overlay: Arc<Mutex<OverlaySurface>>,
    pub board: Arc<StatusBoard>,
}

impl Shared {
    /// Idempotent teardown: stop every track, reset the tally, wipe the overlay.
    fn release(&self) {
        if let Some(mut device) = self.video.detach() {
            device.stop();
            tracing::info!("Capture device released");
        }
        self.board.set_tally(0);
        self.overlay.lock().clear();
        self.board.set_status(StreamStatus::Stopped);
    }
}

struct ActiveSession {
    id: String,
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<Result<(), SessionError>>,
}

pub struct CaptureController {
    provider: Arc<dyn DeviceProvider>,
    settings: ControllerSettings,
    shared: Arc<Shared>,
    metrics: Arc<Metrics>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
}

impl CaptureController {
    pub fn new(
        provider: Arc<dyn DeviceProvider>,
        settings: ControllerSettings,
        overlay_size: (u32, u32),
        metrics: Arc<Metrics>,
    ) -> Self {
        let shared = Arc::new(Shared {
            video: Arc::new(VideoElement::new()),
            overlay: Arc::new(Mutex::new(OverlaySurface::new(
                overlay_size.0,
                overlay_size.1,
            ))),
            board: Arc::new(StatusBoard::new()),
        });
        Self {
            provider,
            settings,
            shared,
            metrics,
            active: tokio::sync::Mutex::new(None),
        }
    }

    pub fn shared(&self) -> Arc<Shared> {
        self.shared.clone()
    }

    pub fn board(&self) -> Arc<StatusBoard> {
        self.shared.board.clone()
    }

    /// Acquires the device and opens a session. Any session still active is
    /// fully torn down first so the device is never claimed twice.
    pub async fn start(&self) -> Result<String, ControllerError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            tracing::info!(session_id = %previous.id, "Tearing down previous session");
            self.teardown(previous).await;
        }

        let session_id = new_session_id();
        let endpoint = self.settings.backend.get_endpoint(&session_id)?;

        let device = match self.provider.acquire() {
            Ok(device) => device,
            Err(e) => {
                tracing::error!("Failed to acquire capture device: {:?}", e);
                self.shared.release();
                return Err(ControllerError::DeviceUnavailable(e));
            }
        };
        self.shared.video.attach(device);
        self.shared.board.set_status(StreamStatus::Streaming);

        let sampler = FrameSampler::new(
            self.shared.video.clone(),
            self.shared.overlay.clone(),
            self.settings.jpeg_quality,
        );
        let session = StreamSession::new(
            session_id.clone(),
            sampler,
            self.shared.overlay.clone(),
            self.shared.board.clone(),
            self.metrics.clone(),
        );

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let shared = self.shared.clone();
        let refresh = self.settings.refresh_interval;
        let handle = tokio::spawn(async move {
            let outcome = session.run(endpoint, refresh, stop_rx).await;
            shared.release();
            outcome
        });

        *active = Some(ActiveSession {
            id: session_id.clone(),
            stop_tx,
            handle,
        });
        Ok(session_id)
    }

    /// Safe from any state, including before the first `start`.
    pub async fn stop(&self) {
        let previous = self.active.lock().await.take();
        if let Some(previous) = previous {
            self.teardown(previous).await;
        }
        self.shared.release();
    }

    async fn teardown(&self, session: ActiveSession) {
        // The task may already have finished on its own.
        let _ = session.stop_tx.send(());
        match session.handle.await {
            Ok(Ok(())) => tracing::info!(session_id = %session.id, "Session closed"),
            Ok(Err(e)) => tracing::warn!(session_id = %session.id, "Session ended with error: {}", e),
            Err(e) => tracing::error!(session_id = %session.id, "Session task failed: {:?}", e),
        }
        self.shared.release();
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            tracing::info!(session_id = %session.id, "Controller dropped, stopping session");
            let _ = session.stop_tx.send(());
        }
        self.shared.release();
    }
}
