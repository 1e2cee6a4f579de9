//! Detector wire formats.
//!
//! The detector has shipped two incompatible JSON shapes:
//!
//! - single-direction: `{ "status": "ok", "direction": "KIRI", "faces": [...] }`,
//!   optionally with a legacy top-level `bbox` instead of `faces`
//! - multi-detection: `{ "status": "ok", "detections": [{ "bbox": [...], "direction": ... }] }`
//!
//! Both are parsed into `DetectorResponse` here and nowhere else.
//!
//! The detector's JSON encoder writes `NaN` and `Infinity` as bare tokens.
//! Those become `null`, and a box with a missing coordinate is kept as
//! `None` so the rest of the frame still parses.

use std::borrow::Cow;

use serde::{Deserialize, Deserializer};

use super::result::{BoundingBox, Direction, FrameDimensions};
use crate::error::DetectorFailure;

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    direction: Option<Direction>,
    #[serde(default)]
    detections: Option<Vec<RawDetection>>,
    #[serde(default)]
    faces: Option<Vec<RawFace>>,
    #[serde(default, deserialize_with = "lenient_legacy_box")]
    bbox: Option<LegacyBox>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    face_confidence: Option<f64>,
    #[serde(default)]
    frame_width: Option<u32>,
    #[serde(default)]
    frame_height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawDetection {
    direction: Direction,
    #[serde(default, deserialize_with = "lenient_corners")]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    x1: Option<f64>,
    #[serde(default)]
    y1: Option<f64>,
    #[serde(default)]
    x2: Option<f64>,
    #[serde(default)]
    y2: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    face_confidence: Option<f64>,
    #[serde(default)]
    yolo_confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawFace {
    #[serde(default, deserialize_with = "lenient_corners")]
    bbox: Option<[f64; 4]>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Top-level box of the oldest single-direction format.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LegacyBox {
    /// Fractions of the frame, scaled by the display size.
    Normalized {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    /// Pixel corners in detector space.
    Corners([f64; 4]),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WireFace {
    pub bbox: BoundingBox,
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WireDetection {
    /// `None` when the element carried no usable coordinates.
    pub bbox: Option<BoundingBox>,
    pub direction: Direction,
    pub confidence: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SingleDirectionResponse {
    pub direction: Direction,
    pub faces: Vec<WireFace>,
    pub legacy_box: Option<LegacyBox>,
    pub confidence: Option<f64>,
    pub frame: Option<FrameDimensions>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MultiDetectionResponse {
    pub detections: Vec<WireDetection>,
    pub frame: Option<FrameDimensions>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DetectorResponse {
    SingleDirection(SingleDirectionResponse),
    MultiDetection(MultiDetectionResponse),
}

impl DetectorResponse {
    pub fn parse(body: &[u8]) -> Result<Self, DetectorFailure> {
        let raw: RawResponse = serde_json::from_slice(&null_non_finite(body))
            .map_err(|e| DetectorFailure::Malformed(e.to_string()))?;

        let failed = raw.success == Some(false)
            || raw
                .status
                .as_deref()
                .is_some_and(|status| !status.eq_ignore_ascii_case("ok"));
        if failed {
            return Err(DetectorFailure::Malformed(format!(
                "detector reported failure: {}",
                raw.message.as_deref().unwrap_or("no message")
            )));
        }

        let frame = match (raw.frame_width, raw.frame_height) {
            (Some(width), Some(height)) if width > 0 && height > 0 => {
                Some(FrameDimensions::new(width, height))
            }
            _ => None,
        };

        if let Some(detections) = raw.detections {
            let detections = detections
                .into_iter()
                .map(|det| {
                    let bbox = match (det.bbox, det.x1, det.y1, det.x2, det.y2) {
                        (Some([x1, y1, x2, y2]), ..) => Some(BoundingBox::new(x1, y1, x2, y2)),
                        (None, Some(x1), Some(y1), Some(x2), Some(y2)) => {
                            Some(BoundingBox::new(x1, y1, x2, y2))
                        }
                        _ => None,
                    };
                    WireDetection {
                        bbox,
                        direction: det.direction,
                        confidence: det
                            .confidence
                            .or(det.face_confidence)
                            .or(det.yolo_confidence),
                    }
                })
                .collect();
            return Ok(DetectorResponse::MultiDetection(MultiDetectionResponse {
                detections,
                frame,
            }));
        }

        let direction = raw
            .direction
            .ok_or_else(|| DetectorFailure::Malformed("missing direction".to_string()))?;
        let faces = raw
            .faces
            .unwrap_or_default()
            .into_iter()
            .filter_map(|face| {
                let Some([x1, y1, x2, y2]) = face.bbox else {
                    log::debug!("dropping face without finite coordinates");
                    return None;
                };
                Some(WireFace {
                    bbox: BoundingBox::new(x1, y1, x2, y2),
                    confidence: face.confidence,
                })
            })
            .collect();

        Ok(DetectorResponse::SingleDirection(SingleDirectionResponse {
            direction,
            faces,
            legacy_box: raw.bbox,
            confidence: raw.face_confidence.or(raw.confidence),
            frame,
        }))
    }

    pub fn frame(&self) -> Option<FrameDimensions> {
        match self {
            DetectorResponse::SingleDirection(single) => single.frame,
            DetectorResponse::MultiDetection(multi) => multi.frame,
        }
    }
}

/// `[x1, y1, x2, y2]` where every entry is a number; anything else is `None`.
fn lenient_corners<'de, D>(deserializer: D) -> Result<Option<[f64; 4]>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<Vec<Option<f64>>> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|corners| match corners.as_slice() {
        [Some(x1), Some(y1), Some(x2), Some(y2)] => Some([*x1, *y1, *x2, *y2]),
        _ => None,
    }))
}

fn lenient_legacy_box<'de, D>(deserializer: D) -> Result<Option<LegacyBox>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<serde_json::Value> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value(value).ok()))
}

const NON_FINITE_TOKENS: [&[u8]; 3] = [b"-Infinity", b"Infinity", b"NaN"];

/// Rewrite bare `NaN`, `Infinity` and `-Infinity` outside strings as `null`.
fn null_non_finite(body: &[u8]) -> Cow<'_, [u8]> {
    let present = NON_FINITE_TOKENS
        .iter()
        .any(|token| body.windows(token.len()).any(|window| window == *token));
    if !present {
        return Cow::Borrowed(body);
    }

    let mut out = Vec::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;
    while i < body.len() {
        let byte = body[i];
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
        } else if byte == b'"' {
            in_string = true;
        } else if let Some(token) = NON_FINITE_TOKENS
            .iter()
            .find(|token| body[i..].starts_with(token))
        {
            out.extend_from_slice(b"null");
            i += token.len();
            continue;
        }
        out.push(byte);
        i += 1;
    }
    Cow::Owned(out)
}
