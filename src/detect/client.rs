use super::backend::DetectorBackend;
use super::result::{BoundingBox, Detection, DetectionResult, Direction, FrameDimensions};
use super::wire::{DetectorResponse, LegacyBox};
use crate::error::DetectorFailure;

/// Confidence assumed when the detector omits one.
const DEFAULT_CONFIDENCE: f64 = 0.8;

/// Turns detector answers into canonical results in display pixel space.
#[derive(Clone, Copy, Debug)]
pub struct DetectionClient {
    display: FrameDimensions,
}

impl DetectionClient {
    pub fn new(display: FrameDimensions) -> Self {
        Self { display }
    }

    /// One round-trip: submit the frame and normalise whatever comes back.
    pub fn submit(
        &self,
        backend: &dyn DetectorBackend,
        jpeg: &[u8],
    ) -> Result<DetectionResult, DetectorFailure> {
        let response = backend.detect(jpeg)?;
        Ok(self.normalize(response))
    }

    pub fn normalize(&self, response: DetectorResponse) -> DetectionResult {
        let frame = response.frame().unwrap_or(FrameDimensions::DETECTOR_DEFAULT);
        let (sx, sy) = self.scale_from(frame);

        let (primary, detections) = match response {
            DetectorResponse::MultiDetection(multi) => {
                let detections: Vec<Detection> = multi
                    .detections
                    .into_iter()
                    .filter_map(|det| {
                        let Some(bbox) = det.bbox else {
                            log::debug!("dropping {} detection without coordinates", det.direction);
                            return None;
                        };
                        finite_detection(bbox.scaled(sx, sy), det.direction, det.confidence)
                    })
                    .collect();
                let primary = detections
                    .first()
                    .map(|det| det.direction)
                    .unwrap_or(Direction::Front);
                (primary, detections)
            }
            DetectorResponse::SingleDirection(single) => {
                let mut detections: Vec<Detection> = single
                    .faces
                    .into_iter()
                    .filter_map(|face| {
                        finite_detection(
                            face.bbox.scaled(sx, sy),
                            single.direction,
                            face.confidence.or(single.confidence),
                        )
                    })
                    .collect();
                if detections.is_empty() {
                    if let Some(legacy) = single.legacy_box {
                        let bbox = match legacy {
                            LegacyBox::Normalized {
                                x,
                                y,
                                width,
                                height,
                            } => {
                                let w = f64::from(self.display.width);
                                let h = f64::from(self.display.height);
                                BoundingBox::new(x, y, x + width, y + height).scaled(w, h)
                            }
                            LegacyBox::Corners([x1, y1, x2, y2]) => {
                                BoundingBox::new(x1, y1, x2, y2).scaled(sx, sy)
                            }
                        };
                        detections.extend(finite_detection(
                            bbox,
                            single.direction,
                            single.confidence,
                        ));
                    }
                }
                (single.direction, detections)
            }
        };

        DetectionResult {
            primary_direction: primary,
            detections,
            frame_dimensions: frame,
        }
    }

    fn scale_from(&self, frame: FrameDimensions) -> (f64, f64) {
        if frame == self.display || frame.width == 0 || frame.height == 0 {
            return (1.0, 1.0);
        }
        (
            f64::from(self.display.width) / f64::from(frame.width),
            f64::from(self.display.height) / f64::from(frame.height),
        )
    }
}

fn finite_detection(
    bbox: BoundingBox,
    direction: Direction,
    confidence: Option<f64>,
) -> Option<Detection> {
    if !bbox.is_finite() {
        log::warn!("dropping {} detection with non-finite bbox {:?}", direction, bbox);
        return None;
    }
    let confidence = confidence
        .filter(|c| c.is_finite())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0) as f32;
    Some(Detection {
        bbox,
        direction,
        confidence,
    })
}
