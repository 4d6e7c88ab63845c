use crate::camera::{CameraError, CaptureDevice};
use image::RgbImage;
use parking_lot::Mutex;
use std::sync::Arc;

/// The element the live device output is bound to.
///
/// Only the frame sampler advances the device. The display feed reads the last
/// captured frame, so the two never split the device's frames between them.
#[derive(Default)]
pub struct VideoElement {
    source: Mutex<Option<Box<dyn CaptureDevice>>>,
    last_frame: Mutex<Option<Arc<RgbImage>>>,
}

impl VideoElement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, device: Box<dyn CaptureDevice>) {
        let mut source = self.source.lock();
        if let Some(mut previous) = source.replace(device) {
            tracing::warn!("Replacing a capture device that was never detached");
            previous.stop();
        }
        *self.last_frame.lock() = None;
    }

    pub fn detach(&self) -> Option<Box<dyn CaptureDevice>> {
        let device = self.source.lock().take();
        *self.last_frame.lock() = None;
        device
    }

    pub fn is_attached(&self) -> bool {
        self.source.lock().is_some()
    }

    /// Pulls the next frame from the attached device and remembers it.
    /// `None` when detached or the device has nothing buffered yet.
    pub fn capture_frame(&self) -> Result<Option<Arc<RgbImage>>, CameraError> {
        let mut source = self.source.lock();
        let Some(device) = source.as_mut() else {
            return Ok(None);
        };
        let Some(frame) = device.read_frame()? else {
            return Ok(None);
        };
        let frame = Arc::new(frame);
        *self.last_frame.lock() = Some(frame.clone());
        Ok(Some(frame))
    }

    /// Most recently captured frame; never touches the device.
    pub fn latest_frame(&self) -> Option<Arc<RgbImage>> {
        self.last_frame.lock().clone()
    }
}
