use crate::camera::CameraError;
use crate::display::VideoElement;
use crate::image_utils::{self, ImageUtilsError};
use crate::overlay::OverlaySurface;
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("Image error: {0}")]
    Image(#[from] ImageUtilsError),
}

/// A lossy still of the most recent frame, ready to be sent.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl EncodedFrame {
    pub fn to_data_url(&self) -> String {
        image_utils::to_data_url(&self.jpeg)
    }
}

/// Rasterizes the display element's current frame at the overlay's geometry.
pub struct FrameSampler {
    video: Arc<VideoElement>,
    overlay: Arc<Mutex<OverlaySurface>>,
    quality: u8,
}

impl FrameSampler {
    pub fn new(video: Arc<VideoElement>, overlay: Arc<Mutex<OverlaySurface>>, quality: u8) -> Self {
        Self {
            video,
            overlay,
            quality: quality.clamp(1, 100),
        }
    }

    /// `Ok(None)` when the capture source has nothing displayable yet.
    #[instrument(skip(self))]
    pub fn sample(&self) -> Result<Option<EncodedFrame>, SamplerError> {
        let Some(frame) = self.video.capture_frame()? else {
            return Ok(None);
        };

        let (width, height) = self.overlay.lock().dimensions();
        let raster = image_utils::fit_to(&frame, width, height);
        let jpeg = image_utils::encode_jpeg(&raster, self.quality)?;

        Ok(Some(EncodedFrame {
            jpeg,
            width: raster.width(),
            height: raster.height(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::TestPatternCamera;

    fn sampler(warmup_frames: u32, overlay: (u32, u32)) -> FrameSampler {
        let video = Arc::new(VideoElement::new());
        video.attach(Box::new(TestPatternCamera::new(64, 48, warmup_frames)));
        let overlay = Arc::new(Mutex::new(OverlaySurface::new(overlay.0, overlay.1)));
        FrameSampler::new(video, overlay, 50)
    }

    #[test]
    fn test_sample_is_empty_until_camera_has_data() {
        let sampler = sampler(1, (64, 48));

        assert!(sampler.sample().unwrap().is_none());
        assert!(sampler.sample().unwrap().is_some());
    }

    #[test]
    fn test_sample_matches_overlay_dimensions() {
        let sampler = sampler(0, (32, 24));

        let frame = sampler.sample().unwrap().unwrap();
        let decoded = image::load_from_memory(&frame.jpeg).unwrap();

        assert_eq!((frame.width, frame.height), (32, 24));
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        assert!(frame.to_data_url().starts_with("data:image/jpeg;base64,"));
    }

    #[test]
    fn test_sample_without_device_is_empty() {
        let video = Arc::new(VideoElement::new());
        let overlay = Arc::new(Mutex::new(OverlaySurface::new(64, 48)));
        let sampler = FrameSampler::new(video, overlay, 50);

        assert!(sampler.sample().unwrap().is_none());
    }
}
