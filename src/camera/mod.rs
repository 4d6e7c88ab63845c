//! Capture devices and the request-access call that hands them out.
//!
//! A [`CaptureDevice`] is exclusively owned by whoever acquired it. Frames are
//! pulled synchronously; a device that has not buffered a displayable frame yet
//! answers `Ok(None)` instead of blocking.

#[cfg(feature = "opencv")]
mod opencv_camera;
mod test_pattern;

use crate::config::{CameraConfig, CameraSource};
use image::RgbImage;
use thiserror::Error;

#[cfg(feature = "opencv")]
pub use opencv_camera::OpenCvCamera;
pub use test_pattern::TestPatternCamera;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(String),
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] ::opencv::Error),
}

pub trait CaptureDevice: Send {
    /// Latest displayable frame, or `None` while the device is still warming up.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CameraError>;

    /// Stops every underlying track. Calling it twice is harmless.
    fn stop(&mut self);

    fn is_live(&self) -> bool;
}

pub trait DeviceProvider: Send + Sync + 'static {
    fn acquire(&self) -> Result<Box<dyn CaptureDevice>, CameraError>;
}

/// Hands out the device selected by `camera.source`.
#[derive(Debug, Clone)]
pub struct ConfiguredDeviceProvider {
    config: CameraConfig,
}

impl ConfiguredDeviceProvider {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl DeviceProvider for ConfiguredDeviceProvider {
    fn acquire(&self) -> Result<Box<dyn CaptureDevice>, CameraError> {
        match self.config.source {
            CameraSource::TestPattern => Ok(Box::new(TestPatternCamera::new(
                self.config.width,
                self.config.height,
                self.config.warmup_frames,
            ))),
            #[cfg(feature = "opencv")]
            CameraSource::Opencv => Ok(Box::new(OpenCvCamera::open(self.config.device_index)?)),
            #[cfg(not(feature = "opencv"))]
            CameraSource::Opencv => Err(CameraError::DeviceUnavailable(
                "built without the `opencv` feature".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_config(source: CameraSource) -> CameraConfig {
        CameraConfig {
            source,
            device_index: 0,
            width: 64,
            height: 48,
            warmup_frames: 0,
            refresh_fps: 60,
            stream_fps: 30,
            autostart: false,
        }
    }

    #[test]
    fn test_provider_hands_out_test_pattern() {
        let provider = ConfiguredDeviceProvider::new(&camera_config(CameraSource::TestPattern));

        let mut device = provider.acquire().unwrap();
        let frame = device.read_frame().unwrap().unwrap();

        assert!(device.is_live());
        assert_eq!(frame.dimensions(), (64, 48));
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn test_provider_without_opencv_reports_unavailable() {
        let provider = ConfiguredDeviceProvider::new(&camera_config(CameraSource::Opencv));

        let result = provider.acquire();

        assert!(matches!(result, Err(CameraError::DeviceUnavailable(_))));
    }
}
