use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Direction, FrameDimensions};
use crate::detect::wire::{DetectorResponse, MultiDetectionResponse, WireDetection};
use crate::error::DetectorFailure;

/// Frame size the scripted backend pretends to run at.
const STUB_FRAME: FrameDimensions = FrameDimensions {
    width: 640,
    height: 480,
};

#[derive(Clone, Debug, PartialEq)]
pub enum ScriptStep {
    /// One subject looking this way.
    Subject(Direction),
    /// Nobody in frame.
    Empty,
    /// The round-trip fails.
    Fail(DetectorFailure),
}

/// Detector that replays a fixed script, one step per frame.
///
/// Used for tests and for running the daemon without a detector service
/// (`detector.backend = "stub"`). The script loops once exhausted. A step
/// may be given a delay to stand in for a slow round-trip; the delay runs
/// outside the cursor lock so concurrent requests overlap.
pub struct ScriptedBackend {
    script: Vec<ScriptStep>,
    delays: Vec<Duration>,
    cursor: Mutex<usize>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script,
            delays: Vec::new(),
            cursor: Mutex::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn repeating(directions: Vec<Direction>) -> Self {
        Self::new(directions.into_iter().map(ScriptStep::Subject).collect())
    }

    /// Parse a comma-separated script such as `LEFT,LEFT,FRONT,none,fail`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let mut script = Vec::new();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let step = match token.to_ascii_lowercase().as_str() {
                "none" | "empty" => ScriptStep::Empty,
                "fail" => ScriptStep::Fail(DetectorFailure::Transport("scripted failure".into())),
                _ => ScriptStep::Subject(
                    Direction::parse(token)
                        .ok_or_else(|| anyhow!("unknown script step '{}'", token))?,
                ),
            };
            script.push(step);
        }
        if script.is_empty() {
            return Err(anyhow!("detector script is empty"));
        }
        Ok(Self::new(script))
    }

    /// Delay per script step, matched by index and cycled like the script.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    /// Requests that have taken a script step so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Option<(ScriptStep, Duration)> {
        let mut cursor = self.cursor.lock().ok()?;
        let index = *cursor;
        let step = self.script.get(index)?.clone();
        *cursor = (index + 1) % self.script.len();
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = if self.delays.is_empty() {
            Duration::ZERO
        } else {
            self.delays[index % self.delays.len()]
        };
        Some((step, delay))
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::repeating(vec![Direction::Front])
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&self, _jpeg: &[u8]) -> Result<DetectorResponse, DetectorFailure> {
        let Some((step, delay)) = self.next_step() else {
            return Err(DetectorFailure::Malformed("empty script".to_string()));
        };
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let detections = match step {
            ScriptStep::Subject(direction) => vec![WireDetection {
                bbox: Some(BoundingBox::new(220.0, 120.0, 420.0, 360.0)),
                direction,
                confidence: Some(0.9),
            }],
            ScriptStep::Empty => Vec::new(),
            ScriptStep::Fail(failure) => return Err(failure),
        };
        Ok(DetectorResponse::MultiDetection(MultiDetectionResponse {
            detections,
            frame: Some(STUB_FRAME),
        }))
    }
}
