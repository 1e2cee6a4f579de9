//! HTTP snapshot camera.
//!
//! Polls a URL that returns a single JPEG per GET, as exposed by most IP
//! webcams and ESP32 camera firmwares (`/capture`, `/snapshot.jpg`).

use std::io::Read;
use std::time::Duration;

use image::GenericImageView;

use crate::error::CameraError;
use crate::frame::{Frame, VideoSource};

const MAX_JPEG_BYTES: u64 = 5 * 1024 * 1024;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpSnapshotCamera {
    url: String,
    agent: ureq::Agent,
    running: bool,
}

impl HttpSnapshotCamera {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
            running: false,
        }
    }

    fn fetch(&self) -> Result<Frame, CameraError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(map_request_error)?;
        let mut jpeg = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES)
            .read_to_end(&mut jpeg)
            .map_err(|e| CameraError::Unavailable(format!("read snapshot: {}", e)))?;
        if jpeg.is_empty() {
            return Err(CameraError::Unavailable("empty jpeg snapshot".into()));
        }
        let (width, height) = image::load_from_memory(&jpeg)
            .map_err(|e| CameraError::Unavailable(format!("decode snapshot: {}", e)))?
            .dimensions();
        Ok(Frame {
            jpeg,
            width,
            height,
        })
    }
}

fn map_request_error(err: ureq::Error) -> CameraError {
    match err {
        ureq::Error::Status(401 | 403, _) => CameraError::PermissionDenied,
        ureq::Error::Status(404, _) => CameraError::DeviceNotFound,
        ureq::Error::Status(code, _) => CameraError::Unavailable(format!("status {}", code)),
        ureq::Error::Transport(t) => match t.kind() {
            ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed => {
                CameraError::DeviceNotFound
            }
            _ => CameraError::Unavailable(t.to_string()),
        },
    }
}

impl VideoSource for HttpSnapshotCamera {
    fn describe(&self) -> String {
        format!("{} (http snapshot)", self.url)
    }

    /// Fetches one frame so acquisition errors surface before a session starts.
    fn start(&mut self) -> Result<(), CameraError> {
        let first = self.fetch()?;
        self.running = true;
        log::info!(
            "camera started: {} ({}x{})",
            self.describe(),
            first.width,
            first.height
        );
        Ok(())
    }

    fn snapshot(&mut self) -> Result<Frame, CameraError> {
        if !self.running {
            return Err(CameraError::Unavailable("camera not started".into()));
        }
        self.fetch()
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
