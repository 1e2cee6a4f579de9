//! Operator overlay: boxes, labels and direction arrows over the live video.
//!
//! Drawing goes through the `Canvas` trait. `DrawList` records operations for
//! UIs and tests; `ShapeCanvas` rasterises the shapes (not the text) onto an
//! RGBA image with imageproc.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_polygon_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;
use serde::Serialize;
use std::path::Path;

use crate::detect::{Detection, DetectionResult, Direction};

/// Straight RGBA.
pub type Color = [u8; 4];

pub const FRONT_COLOR: Color = [0, 255, 0, 255];
pub const SIDE_COLOR: Color = [255, 0, 0, 255];
const FRONT_PLATE: Color = [0, 255, 0, 204];
const SIDE_PLATE: Color = [255, 0, 0, 204];
const DARK_TEXT: Color = [0, 0, 0, 255];
const LIGHT_TEXT: Color = [255, 255, 255, 255];

const STROKE_WIDTH: f64 = 3.0;
const ARROW_LENGTH: f64 = 80.0;
const ARROW_HEAD: f64 = 15.0;
const CONFIDENCE_FONT_PX: f64 = 14.0;
const DIRECTION_FONT_PX: f64 = 16.0;
const PLATE_HEIGHT: f64 = 24.0;

pub trait Canvas {
    fn size(&self) -> (u32, u32);
    fn clear(&mut self);
    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color, width: f64);
    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color);
    /// `(x, y)` is the text baseline origin.
    fn fill_text(&mut self, text: &str, x: f64, y: f64, px: f64, color: Color);
    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Color, width: f64);
    fn fill_triangle(&mut self, points: [(f64, f64); 3], color: Color);

    /// Approximate advance width of `text` at `px`.
    fn measure_text(&self, text: &str, px: f64) -> f64 {
        text.chars().count() as f64 * px * 0.6
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawOp {
    Clear,
    StrokeRect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        color: Color,
        width: f64,
    },
    FillRect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        color: Color,
    },
    Text {
        text: String,
        x: f64,
        y: f64,
        px: f64,
        color: Color,
    },
    Line {
        from: (f64, f64),
        to: (f64, f64),
        color: Color,
        width: f64,
    },
    Triangle {
        points: [(f64, f64); 3],
        color: Color,
    },
}

/// Records draw calls instead of rasterising them.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DrawList {
    width: u32,
    height: u32,
    ops: Vec<DrawOp>,
}

impl DrawList {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ops: Vec::new(),
        }
    }

    pub fn ops(&self) -> &[DrawOp] {
        &self.ops
    }

    /// Number of operations after the leading clear.
    pub fn shape_count(&self) -> usize {
        self.ops.iter().filter(|op| **op != DrawOp::Clear).count()
    }

    /// Rasterise the recorded operations.
    pub fn replay(&self, canvas: &mut dyn Canvas) {
        for op in &self.ops {
            match op {
                DrawOp::Clear => canvas.clear(),
                DrawOp::StrokeRect {
                    x,
                    y,
                    w,
                    h,
                    color,
                    width,
                } => canvas.stroke_rect(*x, *y, *w, *h, *color, *width),
                DrawOp::FillRect { x, y, w, h, color } => canvas.fill_rect(*x, *y, *w, *h, *color),
                DrawOp::Text {
                    text,
                    x,
                    y,
                    px,
                    color,
                } => canvas.fill_text(text, *x, *y, *px, *color),
                DrawOp::Line {
                    from,
                    to,
                    color,
                    width,
                } => canvas.line(*from, *to, *color, *width),
                DrawOp::Triangle { points, color } => canvas.fill_triangle(*points, *color),
            }
        }
    }
}

impl Canvas for DrawList {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(DrawOp::Clear);
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color, width: f64) {
        self.ops.push(DrawOp::StrokeRect {
            x,
            y,
            w,
            h,
            color,
            width,
        });
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        self.ops.push(DrawOp::FillRect { x, y, w, h, color });
    }

    fn fill_text(&mut self, text: &str, x: f64, y: f64, px: f64, color: Color) {
        self.ops.push(DrawOp::Text {
            text: text.to_string(),
            x,
            y,
            px,
            color,
        });
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Color, width: f64) {
        self.ops.push(DrawOp::Line {
            from,
            to,
            color,
            width,
        });
    }

    fn fill_triangle(&mut self, points: [(f64, f64); 3], color: Color) {
        self.ops.push(DrawOp::Triangle { points, color });
    }
}

/// Shapes-only raster canvas on a transparent RGBA image.
///
/// Boxes, label plates and arrows are drawn; text ops are skipped because
/// no font is bundled. Use the `DrawList` when labels are needed.
pub struct ShapeCanvas {
    image: RgbaImage,
}

impl ShapeCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("failed to save overlay {}", path.display()))
    }

    /// Clip to the image and convert; `None` when nothing is left to draw.
    fn rect(&self, x: f64, y: f64, w: f64, h: f64) -> Option<Rect> {
        let (img_w, img_h) = self.image.dimensions();
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
            return None;
        }
        let x1 = x.min(x + w).max(0.0).round();
        let y1 = y.min(y + h).max(0.0).round();
        let x2 = x.max(x + w).min(f64::from(img_w)).round();
        let y2 = y.max(y + h).min(f64::from(img_h)).round();
        if x2 - x1 < 1.0 || y2 - y1 < 1.0 {
            return None;
        }
        Some(Rect::at(x1 as i32, y1 as i32).of_size((x2 - x1) as u32, (y2 - y1) as u32))
    }
}

impl Canvas for ShapeCanvas {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color, width: f64) {
        let passes = width.round().max(1.0) as i32;
        // Centre the stroke on the outline.
        let half = f64::from(passes / 2);
        for i in 0..passes {
            let inset = f64::from(i) - half;
            if let Some(rect) = self.rect(x + inset, y + inset, w - 2.0 * inset, h - 2.0 * inset) {
                draw_hollow_rect_mut(&mut self.image, rect, Rgba(color));
            }
        }
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, color: Color) {
        if let Some(rect) = self.rect(x, y, w, h) {
            draw_filled_rect_mut(&mut self.image, rect, Rgba(color));
        }
    }

    fn fill_text(&mut self, text: &str, _x: f64, _y: f64, _px: f64, _color: Color) {
        log::trace!("overlay text '{}' not rasterised", text);
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), color: Color, width: f64) {
        let passes = width.round().max(1.0) as i32;
        let horizontal = (to.0 - from.0).abs() >= (to.1 - from.1).abs();
        for i in 0..passes {
            let offset = f64::from(i - passes / 2);
            let (dx, dy) = if horizontal { (0.0, offset) } else { (offset, 0.0) };
            draw_line_segment_mut(
                &mut self.image,
                ((from.0 + dx) as f32, (from.1 + dy) as f32),
                ((to.0 + dx) as f32, (to.1 + dy) as f32),
                Rgba(color),
            );
        }
    }

    fn fill_triangle(&mut self, points: [(f64, f64); 3], color: Color) {
        let poly: Vec<Point<i32>> = points
            .iter()
            .map(|(x, y)| Point::new(x.round() as i32, y.round() as i32))
            .collect();
        // draw_polygon_mut rejects closed or degenerate input.
        if poly[0] == poly[2] || poly[0] == poly[1] || poly[1] == poly[2] {
            return;
        }
        draw_polygon_mut(&mut self.image, &poly, Rgba(color));
    }
}

/// Draws canonical detection results for operator feedback.
#[derive(Clone, Copy, Debug, Default)]
pub struct OverlayRenderer;

impl OverlayRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Clear the canvas and draw every valid detection of `result`.
    pub fn render(&self, canvas: &mut dyn Canvas, result: &DetectionResult) {
        canvas.clear();
        for detection in &result.detections {
            if !detection.bbox.is_finite() {
                log::warn!("skipping overlay for non-finite bbox {:?}", detection.bbox);
                continue;
            }
            self.draw_detection(canvas, detection);
        }
    }

    fn draw_detection(&self, canvas: &mut dyn Canvas, detection: &Detection) {
        let bbox = detection.bbox;
        let front = detection.direction.is_front();
        let (stroke, plate, text_color) = if front {
            (FRONT_COLOR, FRONT_PLATE, DARK_TEXT)
        } else {
            (SIDE_COLOR, SIDE_PLATE, LIGHT_TEXT)
        };

        canvas.stroke_rect(
            bbox.x1,
            bbox.y1,
            bbox.x2 - bbox.x1,
            bbox.y2 - bbox.y1,
            stroke,
            STROKE_WIDTH,
        );

        let confidence = format!("Head: {:.1}%", f64::from(detection.confidence) * 100.0);
        let width = canvas.measure_text(&confidence, CONFIDENCE_FONT_PX);
        canvas.fill_rect(bbox.x1, bbox.y1 - 25.0, width + 8.0, PLATE_HEIGHT, plate);
        canvas.fill_text(
            &confidence,
            bbox.x1 + 4.0,
            bbox.y1 - 8.0,
            CONFIDENCE_FONT_PX,
            text_color,
        );

        let label = detection.direction.as_str();
        let width = canvas.measure_text(label, DIRECTION_FONT_PX);
        canvas.fill_rect(bbox.x1 + 4.0, bbox.y1 + 4.0, width + 8.0, PLATE_HEIGHT, plate);
        canvas.fill_text(
            label,
            bbox.x1 + 8.0,
            bbox.y1 + 20.0,
            DIRECTION_FONT_PX,
            text_color,
        );

        // Mirrored: the arrow shows the viewer's side, not the subject's.
        let sign = match detection.direction {
            Direction::Right => -1.0,
            Direction::Left => 1.0,
            Direction::Front => return,
        };
        let (cx, cy) = bbox.center();
        let tip = (cx + sign * ARROW_LENGTH, cy);
        canvas.line((cx, cy), tip, stroke, STROKE_WIDTH);
        let back = tip.0 - sign * ARROW_HEAD;
        canvas.fill_triangle(
            [
                tip,
                (back, cy - ARROW_HEAD / 2.0),
                (back, cy + ARROW_HEAD / 2.0),
            ],
            stroke,
        );
    }
}
