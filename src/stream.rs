use crate::controller::Shared;
use crate::image_utils::{self, ImageUtilsError};
use ab_glyph::FontArc;
use bytes::Bytes;
use futures::stream;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::time::sleep;
use tracing::instrument;

const FRAME_BOUNDARY: &str = "frame";
const DISPLAY_JPEG_QUALITY: u8 = 85;

#[derive(Clone)]
pub struct VideoStream {
    pub shared: Arc<Shared>,
    pub font: Option<FontArc>,
    pub video_stream_delay: u64,
}

#[derive(Error, Debug)]
pub enum VideoStreamError {
    #[error("Image error: {0}")]
    Image(#[from] ImageUtilsError),
    #[error("Http builder error: {0}")]
    HttpBuilderError(String),
}

impl VideoStream {
    pub fn new(shared: Arc<Shared>, font: Option<FontArc>, video_stream_delay: u64) -> Self {
        Self {
            shared,
            font,
            video_stream_delay,
        }
    }

    /// Last captured frame with the overlay painted on top, at the overlay's
    /// geometry.
    pub fn annotated_frame(&self) -> Result<Option<Vec<u8>>, VideoStreamError> {
        let Some(frame) = self.shared.video.latest_frame() else {
            return Ok(None);
        };
        let overlay = self.shared.overlay.lock().clone();
        let (width, height) = overlay.dimensions();
        let mut frame = image_utils::fit_to(&frame, width, height);
        image_utils::annotate(&mut frame, &overlay, self.font.as_ref());
        Ok(Some(image_utils::encode_jpeg(
            &frame,
            DISPLAY_JPEG_QUALITY,
        )?))
    }

    /// Multipart JPEG stream. While no device is attached the stream idles
    /// instead of ending, so a viewer survives a stop/start cycle.
    #[instrument(skip(self))]
    pub fn generate_stream(self) -> impl futures::Stream<Item = Result<Bytes, VideoStreamError>> {
        let delay = Duration::from_millis(self.video_stream_delay);

        stream::unfold(self, move |video_stream| async move {
            loop {
                sleep(delay).await;
                match video_stream.annotated_frame() {
                    Ok(Some(frame)) => {
                        let part_header = format!(
                            "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                            FRAME_BOUNDARY,
                            frame.len()
                        );
                        let mut body = part_header.into_bytes();
                        body.extend_from_slice(&frame);
                        body.extend_from_slice(b"\r\n");
                        return Some((Ok::<_, VideoStreamError>(Bytes::from(body)), video_stream));
                    }
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::error!("Error getting frame: {:?}", e);
                        return Some((Err(e), video_stream));
                    }
                }
            }
        })
    }
}
