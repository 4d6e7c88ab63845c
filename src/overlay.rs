//! Retained-mode overlay: a transparent surface holding draw commands, and the
//! renderer that repaints it from a detection result.
//!
//! The surface keeps its own pixel dimensions. Resizing clears it, so a result
//! computed against a different frame size is never stretched onto stale
//! geometry.

use crate::detection::Detection;
use image::Rgb;
use serde::Serialize;

pub const REFERENCE_LINE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const STROKE_WIDTH: f32 = 2.0;
pub const LABEL_FONT_SIZE: f32 = 12.0;
const LABEL_OFFSET: f32 = 5.0;
const LABEL_MIN_Y: f32 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DrawCommand {
    Line {
        from: (f32, f32),
        to: (f32, f32),
        color: [u8; 3],
        stroke_width: f32,
    },
    Rect {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        color: [u8; 3],
        stroke_width: f32,
    },
    Text {
        text: String,
        x: f32,
        y: f32,
        color: [u8; 3],
        font_size: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlaySurface {
    width: u32,
    height: u32,
    commands: Vec<DrawCommand>,
}

impl OverlaySurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resizes in place; like a canvas, a resize also wipes the content.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.commands.clear();
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    fn push(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OverlayRenderer;

impl OverlayRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Repaints the whole surface: reference line first, then one box and one
    /// label per detection in input order.
    #[tracing::instrument(skip(self, surface, detections), fields(count = detections.len()))]
    pub fn render(
        &self,
        surface: &mut OverlaySurface,
        detections: &[Detection],
        line_y: f32,
        width: u32,
        height: u32,
    ) {
        surface.clear();

        surface.push(DrawCommand::Line {
            from: (0.0, line_y),
            to: (width as f32, line_y),
            color: REFERENCE_LINE_COLOR.0,
            stroke_width: STROKE_WIDTH,
        });

        for detection in detections {
            let bbox = &detection.bbox;
            surface.push(DrawCommand::Rect {
                x: bbox.x1,
                y: bbox.y1,
                width: bbox.width(),
                height: bbox.height(),
                color: BOX_COLOR.0,
                stroke_width: STROKE_WIDTH,
            });

            let label_y = if bbox.y1 > LABEL_MIN_Y {
                bbox.y1 - LABEL_OFFSET
            } else {
                LABEL_MIN_Y
            };
            surface.push(DrawCommand::Text {
                text: detection.label(),
                x: bbox.x1,
                y: label_y,
                color: BOX_COLOR.0,
                font_size: LABEL_FONT_SIZE,
            });
        }
    }
}
