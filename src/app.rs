use crate::camera::ConfiguredDeviceProvider;
use crate::config::Config;
use crate::controller::{CaptureController, ControllerSettings};
use crate::server::HttpServer;
use crate::telemetry::Metrics;

use ab_glyph::FontArc;
use std::{error::Error, path::Path, sync::Arc, time::Duration};
use tokio::{signal, sync::broadcast};

pub fn build_controller(config: &Config, metrics: Arc<Metrics>) -> CaptureController {
    let provider = Arc::new(ConfiguredDeviceProvider::new(&config.camera));
    let settings = ControllerSettings {
        backend: config.backend.clone(),
        refresh_interval: Duration::from_millis(config.camera.get_refresh_delay_ms()),
        jpeg_quality: config.encoder.jpeg_quality,
    };
    CaptureController::new(
        provider,
        settings,
        (config.overlay.width, config.overlay.height),
        metrics,
    )
}

fn load_font(path: Option<&Path>) -> Option<FontArc> {
    let Some(path) = path else {
        tracing::info!("No overlay font configured, labels are not rasterized in the display feed");
        return None;
    };
    match std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| FontArc::try_from_vec(bytes).map_err(|e| e.to_string()))
    {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!("Failed to load overlay font {:?}: {}", path, e);
            None
        }
    }
}

pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let metrics = Arc::new(Metrics::new()?);
    let controller = Arc::new(build_controller(&config, metrics.clone()));
    let font = load_font(config.overlay.font_path.as_deref());

    let server = HttpServer::new(controller.clone(), metrics, font, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    if config.camera.autostart {
        if let Err(e) = controller.start().await {
            tracing::error!("Failed to start streaming: {}", e);
        }
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    controller.stop().await;
    let _ = shutdown_tx.send(());
    match server_handle.await {
        Ok(Err(e)) => tracing::error!("Display server failed: {:?}", e),
        Err(e) => tracing::error!("Display server task failed: {:?}", e),
        Ok(Ok(())) => {}
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
