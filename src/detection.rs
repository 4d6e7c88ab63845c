use serde::{Deserialize, Deserializer, Serialize};

/// Largest frame edge accepted from the backend, in pixels.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Pixel rectangle in frame coordinates, sent by the backend as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(bbox: BoundingBox) -> Self {
        [bbox.x1, bbox.y1, bbox.x2, bbox.y2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub class_name: String,
    pub confidence: f32,
    pub track_id: Option<i64>,
}

impl Detection {
    /// `"<class> <pct>%"`, with `" ID: <track>"` when the backend tracks the object.
    pub fn label(&self) -> String {
        let mut label = format!(
            "{} {}%",
            self.class_name,
            (self.confidence * 100.0).round() as i64
        );
        if let Some(track_id) = self.track_id {
            label.push_str(&format!(" ID: {}", track_id));
        }
        label
    }
}

/// One inbound message from the detection backend.
///
/// `total_vehicles` is kept as an opaque tally and displayed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub total_vehicles: u64,
    pub line_y: f32,
    #[serde(deserialize_with = "deserialize_dimension")]
    pub frame_width: u32,
    #[serde(deserialize_with = "deserialize_dimension")]
    pub frame_height: u32,
}

impl DetectionResult {
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.frame_width, self.frame_height)
    }
}

fn deserialize_dimension<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    let rounded = value.round();
    if !rounded.is_finite() || rounded < 1.0 || rounded > MAX_FRAME_DIMENSION as f64 {
        return Err(serde::de::Error::custom(format!(
            "{} is not a valid frame dimension (expected 1..={})",
            value, MAX_FRAME_DIMENSION
        )));
    }
    Ok(rounded as u32)
}
