use super::{CameraError, CaptureDevice};
use image::{Rgb, RgbImage};

const BAR_WIDTH: u32 = 24;

/// Synthetic device: a dark frame with a bright bar sweeping left to right.
///
/// The first `warmup_frames` reads report no displayable frame, which mimics a
/// camera that has been opened but has not buffered anything yet.
#[derive(Debug)]
pub struct TestPatternCamera {
    width: u32,
    height: u32,
    warmup_frames: u32,
    reads: u64,
    live: bool,
}

impl TestPatternCamera {
    pub fn new(width: u32, height: u32, warmup_frames: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            warmup_frames,
            reads: 0,
            live: true,
        }
    }

    fn render(&self) -> RgbImage {
        let offset = (self.reads * 4 % self.width as u64) as u32;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x >= offset && x < offset + BAR_WIDTH {
                Rgb([230, 230, 230])
            } else {
                let shade = (y * 64 / self.height) as u8;
                Rgb([shade, shade, 32])
            }
        })
    }
}

impl CaptureDevice for TestPatternCamera {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, CameraError> {
        if !self.live {
            return Err(CameraError::ReadFrameFailed("track stopped".to_string()));
        }
        self.reads += 1;
        if self.reads <= self.warmup_frames as u64 {
            return Ok(None);
        }
        Ok(Some(self.render()))
    }

    fn stop(&mut self) {
        self.live = false;
    }

    fn is_live(&self) -> bool {
        self.live
    }
}
