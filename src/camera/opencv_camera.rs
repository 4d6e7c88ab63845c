use super::{CameraError, CaptureDevice};
use image::RgbImage;
use opencv::{core::Mat, imgproc, prelude::*, videoio};

pub struct OpenCvCamera {
    capture: videoio::VideoCapture,
    live: bool,
}

impl OpenCvCamera {
    pub fn open(index: i32) -> Result<Self, CameraError> {
        let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
            .map_err(|e| CameraError::DeviceUnavailable(e.to_string()))?;
        if !capture.is_opened()? {
            return Err(CameraError::DeviceUnavailable(format!(
                "camera {} could not be opened",
                index
            )));
        }
        tracing::info!("Opened camera {}", index);
        Ok(Self {
            capture,
            live: true,
        })
    }
}

impl CaptureDevice for OpenCvCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CameraError> {
        let mut frame = Mat::default();
        let grabbed = self
            .capture
            .read(&mut frame)
            .map_err(|e| CameraError::ReadFrameFailed(e.to_string()))?;
        if !grabbed || frame.empty() {
            return Ok(None);
        }

        let mut rgb = Mat::default();
        imgproc::cvt_color_def(&frame, &mut rgb, imgproc::COLOR_BGR2RGB)?;

        let (width, height) = (rgb.cols() as u32, rgb.rows() as u32);
        let bytes = rgb.data_bytes()?.to_vec();
        RgbImage::from_raw(width, height, bytes)
            .map(Some)
            .ok_or_else(|| CameraError::ReadFrameFailed("frame buffer size mismatch".to_string()))
    }

    fn stop(&mut self) {
        if !self.live {
            return;
        }
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release camera: {:?}", e);
        }
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}
