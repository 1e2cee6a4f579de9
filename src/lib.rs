//! Headwatch
//!
//! Webcam head-direction monitoring for proctored sessions. Frames from a
//! camera are sent to an external head-pose detector; the per-frame answers
//! are debounced into a stable direction, and a screenshot is captured once
//! per sustained look away from the screen.
//!
//! # Pipeline
//!
//! 1. **DetectionClient** (`detect`): one detector round-trip, normalised to a
//!    canonical `DetectionResult` in display pixels.
//! 2. **DirectionStabilizer** (`stabilizer`): 800 ms debounce over the noisy
//!    per-frame direction, tracking how long the sticky direction is held.
//! 3. **CaptureScheduler** (`capture`): one capture per hold episode whose
//!    hold enters `[3000, 6000)` ms, never for FRONT.
//! 4. **SessionRecorder** (`session`): session lifecycle, captures, tally,
//!    and the best-effort hand-off to a `SessionStore` (`storage`).
//! 5. **OverlayRenderer** (`overlay`): boxes, labels and mirrored arrows.
//!
//! `controller::DetectionController` wires these together for one session
//! and runs the tick loop; it holds no global state.

pub mod capture;
pub mod clock;
pub mod config;
pub mod controller;
pub mod detect;
pub mod error;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod overlay;
pub mod session;
pub mod stabilizer;
pub mod storage;
pub mod ui;

pub use capture::{CaptureDecision, CaptureScheduler, CaptureWindow};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::HeadwatchConfig;
pub use controller::{Applied, ControllerSettings, DetectionController, DetectorStatus, TickReport};
pub use detect::{
    BoundingBox, Detection, DetectionClient, DetectionResult, DetectorBackend, Direction,
    FrameDimensions,
};
pub use error::{CameraError, DetectorFailure, SessionError};
pub use frame::{Frame, VideoSource};
pub use overlay::{Canvas, DrawList, ShapeCanvas, OverlayRenderer};
pub use session::{
    persist_summary, CaptureRecord, DirectionTally, PersistReport, SessionRecorder, SessionSummary,
};
pub use stabilizer::{DirectionStabilizer, EpisodeKey, StabilizerState, Transition};
pub use storage::{InMemorySessionStore, SessionStore, SqliteSessionStore};
