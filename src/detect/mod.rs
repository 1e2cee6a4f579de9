//! Detector boundary.
//!
//! Everything that knows about the external head-pose detector lives here:
//! the wire shapes it speaks, the backends that reach it, and the client
//! that turns its answers into one canonical `DetectionResult`.

mod backend;
pub mod backends;
mod client;
mod registry;
mod result;
pub mod wire;

pub use backend::DetectorBackend;
pub use backends::{HttpBackend, ScriptStep, ScriptedBackend};
pub use client::DetectionClient;
pub use registry::{BackendRegistry, SharedBackend};
pub use result::{BoundingBox, Detection, DetectionResult, Direction, FrameDimensions};
pub use wire::DetectorResponse;
