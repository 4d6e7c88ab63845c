use crate::overlay::{DrawCommand, OverlaySurface};
use ab_glyph::{FontArc, PxScale};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{codecs::jpeg::JpegEncoder, imageops, imageops::FilterType, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut},
    rect::Rect,
};
use thiserror::Error;

const DATA_URL_PREFIX: &str = "data:image/jpeg;base64,";

#[derive(Error, Debug)]
pub enum ImageUtilsError {
    #[error("Failed to encode frame: {0}")]
    EncodeFrameFailed(#[from] image::ImageError),
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, ImageUtilsError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(image)?;
    Ok(buf)
}

pub fn to_data_url(jpeg: &[u8]) -> String {
    let mut url = String::with_capacity(DATA_URL_PREFIX.len() + jpeg.len() * 4 / 3 + 4);
    url.push_str(DATA_URL_PREFIX);
    STANDARD.encode_string(jpeg, &mut url);
    url
}

/// Scales `frame` to `width`x`height`.
pub fn fit_to(frame: &RgbImage, width: u32, height: u32) -> RgbImage {
    if frame.dimensions() == (width, height) {
        return frame.clone();
    }
    imageops::resize(frame, width, height, FilterType::Triangle)
}

/// Rasterizes the overlay onto `frame`. Labels need a font; without one only
/// the line and boxes are painted.
pub fn annotate(frame: &mut RgbImage, surface: &OverlaySurface, font: Option<&FontArc>) {
    for command in surface.commands() {
        match command {
            DrawCommand::Line {
                from,
                to,
                color,
                stroke_width,
            } => {
                for offset in stroke_offsets(*stroke_width) {
                    draw_line_segment_mut(
                        frame,
                        (from.0, from.1 + offset),
                        (to.0, to.1 + offset),
                        Rgb(*color),
                    );
                }
            }
            DrawCommand::Rect {
                x,
                y,
                width,
                height,
                color,
                stroke_width,
            } => {
                for inset in 0..stroke_width.round().max(1.0) as i32 {
                    let w = width.round() as i32 - 2 * inset;
                    let h = height.round() as i32 - 2 * inset;
                    if w <= 0 || h <= 0 {
                        break;
                    }
                    let rect = Rect::at(x.round() as i32 + inset, y.round() as i32 + inset)
                        .of_size(w as u32, h as u32);
                    draw_hollow_rect_mut(frame, rect, Rgb(*color));
                }
            }
            DrawCommand::Text {
                text,
                x,
                y,
                color,
                font_size,
            } => {
                if let Some(font) = font {
                    // Label anchors are baselines; imageproc positions the glyph box top.
                    draw_text_mut(
                        frame,
                        Rgb(*color),
                        x.round() as i32,
                        (y - font_size).round() as i32,
                        PxScale::from(*font_size),
                        font,
                        text,
                    );
                }
            }
        }
    }
}

fn stroke_offsets(stroke_width: f32) -> impl Iterator<Item = f32> {
    let steps = stroke_width.round().max(1.0) as i32;
    (0..steps).map(move |step| step as f32 - (steps - 1) as f32 / 2.0)
}
