use serde::{Deserialize, Serialize};
use std::fmt;

/// Head orientation of a subject as classified by the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "LEFT", alias = "KIRI", alias = "left")]
    Left,
    #[serde(rename = "FRONT", alias = "DEPAN", alias = "front")]
    Front,
    #[serde(rename = "RIGHT", alias = "KANAN", alias = "right")]
    Right,
}

impl Direction {
    pub const ALL: [Direction; 3] = [Direction::Left, Direction::Front, Direction::Right];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Left => "LEFT",
            Direction::Front => "FRONT",
            Direction::Right => "RIGHT",
        }
    }

    /// Parse either the canonical label or the detector's native label.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LEFT" | "KIRI" => Some(Direction::Left),
            "FRONT" | "DEPAN" => Some(Direction::Front),
            "RIGHT" | "KANAN" => Some(Direction::Right),
            _ => None,
        }
    }

    pub fn is_front(self) -> bool {
        self == Direction::Front
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper-left / lower-right pixel corners.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Rescale independently per axis, rounding to whole pixels.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            x1: (self.x1 * sx).round(),
            y1: (self.y1 * sy).round(),
            x2: (self.x2 * sx).round(),
            y2: (self.y2 * sy).round(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub direction: Direction,
    /// Clamped to 0..=1.
    pub confidence: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDimensions {
    pub width: u32,
    pub height: u32,
}

impl FrameDimensions {
    /// Assumed detector frame size when the response omits it.
    pub const DETECTOR_DEFAULT: FrameDimensions = FrameDimensions {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Canonical per-frame detector output. Downstream code never sees the wire shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub primary_direction: Direction,
    pub detections: Vec<Detection>,
    pub frame_dimensions: FrameDimensions,
}

impl DetectionResult {
    /// A frame with nobody in it.
    pub fn empty(frame_dimensions: FrameDimensions) -> Self {
        Self {
            primary_direction: Direction::Front,
            detections: Vec::new(),
            frame_dimensions,
        }
    }

    pub fn primary(&self) -> Option<&Detection> {
        self.detections.first()
    }
}
