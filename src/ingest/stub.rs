//! Synthetic camera for `stub://` URLs.
//!
//! Produces a moving gradient at the requested size. The query string can
//! simulate acquisition failures: `stub://webcam?fail=permission` or
//! `?fail=missing`.

use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use url::Url;

use crate::detect::FrameDimensions;
use crate::error::CameraError;
use crate::frame::{Frame, VideoSource};

const JPEG_QUALITY: u8 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SimulatedFailure {
    Permission,
    Missing,
}

pub struct SyntheticCamera {
    url: String,
    size: FrameDimensions,
    fail: Option<SimulatedFailure>,
    running: bool,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new(url: &Url, size: FrameDimensions) -> anyhow::Result<Self> {
        let mut fail = None;
        for (key, value) in url.query_pairs() {
            if key == "fail" {
                fail = Some(match value.as_ref() {
                    "permission" => SimulatedFailure::Permission,
                    "missing" => SimulatedFailure::Missing,
                    other => anyhow::bail!("unknown stub camera failure '{}'", other),
                });
            }
        }
        if size.width == 0 || size.height == 0 {
            anyhow::bail!("stub camera needs a non-empty frame size");
        }
        Ok(Self {
            url: url.to_string(),
            size,
            fail,
            running: false,
            frame_count: 0,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> RgbImage {
        let shift = (self.frame_count % 256) as u32;
        RgbImage::from_fn(self.size.width, self.size.height, |x, y| {
            Rgb([
                ((x + shift) % 256) as u8,
                ((y + shift) % 256) as u8,
                (((x + y) / 2) % 256) as u8,
            ])
        })
    }
}

impl VideoSource for SyntheticCamera {
    fn describe(&self) -> String {
        format!("{} (synthetic {}x{})", self.url, self.size.width, self.size.height)
    }

    fn start(&mut self) -> Result<(), CameraError> {
        match self.fail {
            Some(SimulatedFailure::Permission) => return Err(CameraError::PermissionDenied),
            Some(SimulatedFailure::Missing) => return Err(CameraError::DeviceNotFound),
            None => {}
        }
        self.running = true;
        log::info!("camera started: {}", self.describe());
        Ok(())
    }

    fn snapshot(&mut self) -> Result<Frame, CameraError> {
        if !self.running {
            return Err(CameraError::Unavailable("camera not started".into()));
        }
        self.frame_count += 1;
        let image = self.render();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&image)
            .map_err(|e| CameraError::Unavailable(format!("encode synthetic frame: {}", e)))?;
        Ok(Frame {
            jpeg,
            width: self.size.width,
            height: self.size.height,
        })
    }

    fn stop(&mut self) {
        if self.running {
            log::info!("camera stopped: {}", self.url);
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera(url: &str) -> SyntheticCamera {
        SyntheticCamera::new(&Url::parse(url).unwrap(), FrameDimensions::new(32, 24)).unwrap()
    }

    #[test]
    fn produces_decodable_jpeg_after_start() {
        let mut cam = camera("stub://webcam");
        assert!(cam.snapshot().is_err());
        cam.start().unwrap();
        let frame = cam.snapshot().unwrap();
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&frame.jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
        cam.stop();
        assert!(!cam.is_running());
        assert_eq!(cam.frames_captured(), 1);
    }

    #[test]
    fn simulated_failures_are_distinguishable() {
        assert_eq!(
            camera("stub://webcam?fail=permission").start(),
            Err(CameraError::PermissionDenied)
        );
        assert_eq!(
            camera("stub://webcam?fail=missing").start(),
            Err(CameraError::DeviceNotFound)
        );
        assert!(
            SyntheticCamera::new(&Url::parse("stub://x?fail=bogus").unwrap(), FrameDimensions::new(1, 1))
                .is_err()
        );
    }
}
