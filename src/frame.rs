//! Frames and the video source seam.
//!
//! A `VideoSource` is the live camera. Its lifecycle follows the detection
//! session: it is started before a session begins and released synchronously
//! when the session stops.

use crate::detect::FrameDimensions;
use crate::error::CameraError;

/// One still from the camera, JPEG-encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn dimensions(&self) -> FrameDimensions {
        FrameDimensions::new(self.width, self.height)
    }
}

pub trait VideoSource: Send {
    /// Short human-readable description for logs.
    fn describe(&self) -> String;

    /// Acquire the device. Fails with a cause the operator can act on.
    fn start(&mut self) -> Result<(), CameraError>;

    /// Grab the current frame.
    fn snapshot(&mut self) -> Result<Frame, CameraError>;

    /// Release the device. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
