//! Camera sources.
//!
//! - `stub://` synthetic camera (tests, demos)
//! - `http(s)://` snapshot camera polled once per tick
//!
//! Sources hand out JPEG stills; nothing here stores or forwards frames.

pub mod http;
pub mod stub;

pub use http::HttpSnapshotCamera;
pub use stub::SyntheticCamera;

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::detect::FrameDimensions;
use crate::frame::VideoSource;

/// Build the camera named by `url`. Synthetic cameras render at `size`.
pub fn open_camera(url: &str, size: FrameDimensions) -> Result<Box<dyn VideoSource>> {
    let parsed = Url::parse(url).with_context(|| format!("invalid camera url '{}'", url))?;
    match parsed.scheme() {
        "stub" => Ok(Box::new(SyntheticCamera::new(&parsed, size)?)),
        "http" | "https" => Ok(Box::new(HttpSnapshotCamera::new(url))),
        other => Err(anyhow!("unsupported camera scheme '{}'", other)),
    }
}
