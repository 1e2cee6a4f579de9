//! The detection loop of one operator visit.
//!
//! `DetectionController` owns the camera, the detector backend handle, the
//! stabilizer, the capture scheduler, the session recorder and the overlay.
//! Every method runs on the caller's thread; only detector round-trips run
//! elsewhere, one short-lived thread per submitted frame. The threads share
//! the backend without a lock, so up to `MAX_IN_FLIGHT` requests really are
//! outstanding at the detector at once.
//!
//! Each submission carries a sequence number. Results are applied in arrival
//! order and a result not newer than the last applied one is discarded, so a
//! slow response for frame N can never overwrite the answer for frame N+1.

use anyhow::Result;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::capture::{CaptureDecision, CaptureScheduler, CaptureWindow};
use crate::clock::Clock;
use crate::detect::{DetectionClient, DetectionResult, Direction, FrameDimensions, SharedBackend};
use crate::error::{DetectorFailure, SessionError};
use crate::frame::VideoSource;
use crate::overlay::{Canvas, DrawList, OverlayRenderer};
use crate::session::{new_session_id, CaptureRecord, SessionRecorder, SessionState, SessionSummary};
use crate::stabilizer::{DirectionStabilizer, StabilizerState, Transition, DEFAULT_DEBOUNCE_MS};

/// Upper bound on detector round-trips outstanding at once.
pub const MAX_IN_FLIGHT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControllerSettings {
    pub display: FrameDimensions,
    pub debounce_ms: u64,
    pub window: CaptureWindow,
    /// Consecutive detector failures before reporting `Offline`.
    pub offline_after: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            display: FrameDimensions::new(1280, 720),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            window: CaptureWindow::default(),
            offline_after: 5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorStatus {
    Online,
    Offline,
}

/// What happened to one detector response.
#[derive(Clone, Debug, PartialEq)]
pub enum Applied {
    /// Older than a response already applied.
    Stale { seq: u64 },
    Failed { seq: u64, failure: DetectorFailure },
    Observed {
        seq: u64,
        transition: Transition,
        captured: bool,
    },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickReport {
    /// Sequence number of the frame submitted this tick.
    pub submitted: Option<u64>,
    pub applied: Vec<Applied>,
}

struct DetectorReply {
    seq: u64,
    outcome: Result<DetectionResult, DetectorFailure>,
}

/// Channel and threads of the running session.
struct Pipeline {
    replies_tx: Sender<DetectorReply>,
    replies: Receiver<DetectorReply>,
    in_flight: Vec<JoinHandle<()>>,
}

pub struct DetectionController {
    settings: ControllerSettings,
    clock: Box<dyn Clock>,
    camera: Box<dyn VideoSource>,
    backend: SharedBackend,
    client: DetectionClient,
    stabilizer: DirectionStabilizer,
    scheduler: CaptureScheduler,
    recorder: SessionRecorder,
    renderer: OverlayRenderer,
    overlay: DrawList,
    pipeline: Option<Pipeline>,
    next_seq: u64,
    last_applied: Option<u64>,
    status: DetectorStatus,
    consecutive_failures: u32,
    latest: Option<DetectionResult>,
}

impl DetectionController {
    pub fn new(
        settings: ControllerSettings,
        camera: Box<dyn VideoSource>,
        backend: SharedBackend,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            client: DetectionClient::new(settings.display),
            stabilizer: DirectionStabilizer::new(settings.debounce_ms),
            scheduler: CaptureScheduler::new(settings.window),
            recorder: SessionRecorder::new(),
            renderer: OverlayRenderer::new(),
            overlay: DrawList::new(settings.display.width, settings.display.height),
            pipeline: None,
            next_seq: 0,
            last_applied: None,
            status: DetectorStatus::Online,
            consecutive_failures: 0,
            latest: None,
            settings,
            clock,
            camera,
            backend,
        }
    }

    pub fn settings(&self) -> ControllerSettings {
        self.settings
    }

    pub fn is_running(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn status(&self) -> DetectorStatus {
        self.status
    }

    pub fn stabilizer_state(&self) -> StabilizerState {
        self.stabilizer.state()
    }

    pub fn active_session(&self) -> Option<&SessionState> {
        self.recorder.active()
    }

    /// The overlay of the most recently applied result.
    pub fn overlay(&self) -> &DrawList {
        &self.overlay
    }

    pub fn latest_result(&self) -> Option<&DetectionResult> {
        self.latest.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.pipeline.as_ref().map_or(0, |p| p.in_flight.len())
    }

    /// Acquire the camera, then open a new session. Returns the session id.
    ///
    /// Camera failures come back as `CameraError` inside the error and leave
    /// no session behind.
    pub fn start(&mut self) -> Result<String> {
        if self.recorder.is_active() {
            return Err(SessionError::AlreadyActive.into());
        }
        self.camera.start()?;

        if let Err(e) = self.backend.warm_up() {
            log::warn!("detector {} warm-up failed: {}", self.backend.name(), e);
        }

        self.stabilizer.reset();
        self.scheduler.reset();
        self.overlay.clear();
        self.next_seq = 0;
        self.last_applied = None;
        self.status = DetectorStatus::Online;
        self.consecutive_failures = 0;
        self.latest = None;

        let (replies_tx, replies) = mpsc::channel();
        self.pipeline = Some(Pipeline {
            replies_tx,
            replies,
            in_flight: Vec::new(),
        });

        let session_id = new_session_id();
        self.recorder
            .start_session(session_id.clone(), self.clock.epoch_ms())?;
        log::info!("detection started on {}", self.camera.describe());
        Ok(session_id)
    }

    /// One timer tick: apply whatever replies have arrived, then submit the
    /// current frame without waiting for its answer.
    pub fn tick(&mut self) -> Result<TickReport> {
        if self.pipeline.is_none() {
            return Err(SessionError::NoActiveSession.into());
        }
        let mut report = TickReport::default();
        while let Some(reply) = self.next_reply(None) {
            report.applied.push(self.apply_outcome(reply.seq, reply.outcome));
        }
        report.submitted = self.submit_frame();
        Ok(report)
    }

    /// Wait up to `timeout` for outstanding replies and apply them.
    pub fn settle(&mut self, timeout: Duration) -> Vec<Applied> {
        let deadline = Instant::now() + timeout;
        let mut applied = Vec::new();
        loop {
            if let Some(reply) = self.next_reply(None) {
                applied.push(self.apply_outcome(reply.seq, reply.outcome));
                continue;
            }
            if self.in_flight() == 0 {
                // A finished thread has already queued its reply.
                while let Some(reply) = self.next_reply(None) {
                    applied.push(self.apply_outcome(reply.seq, reply.outcome));
                }
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                log::debug!("settle timed out with {} requests in flight", self.in_flight());
                break;
            }
            if let Some(reply) = self.next_reply(Some(remaining.min(Duration::from_millis(20)))) {
                applied.push(self.apply_outcome(reply.seq, reply.outcome));
            }
        }
        applied
    }

    /// Feed one detector reply through the pipeline.
    ///
    /// The observation is timestamped when it is applied.
    pub fn apply_outcome(
        &mut self,
        seq: u64,
        outcome: Result<DetectionResult, DetectorFailure>,
    ) -> Applied {
        if self.last_applied.is_some_and(|last| seq <= last) {
            log::debug!(
                "discarding stale detector reply #{} (already applied #{})",
                seq,
                self.last_applied.unwrap_or_default()
            );
            return Applied::Stale { seq };
        }
        self.last_applied = Some(seq);

        let result = match outcome {
            Ok(result) => result,
            Err(failure) => {
                self.record_failure(&failure);
                self.renderer
                    .render(&mut self.overlay, &DetectionResult::empty(self.settings.display));
                return Applied::Failed { seq, failure };
            }
        };
        self.record_success();

        self.renderer.render(&mut self.overlay, &result);
        let now = self.clock.monotonic_ms();
        let observation = self.stabilizer.observe(result.primary_direction, now);
        if observation.transition.starts_episode() {
            self.scheduler.reset();
        }

        let mut captured = false;
        if let (Some(sticky), Some(episode)) =
            (observation.state.sticky_direction, observation.state.episode())
        {
            let decision =
                self.scheduler
                    .on_tick(sticky, observation.state.hold_duration_ms, episode);
            if let CaptureDecision::Capture(_) = decision {
                captured = self.capture(sticky, &result);
            }
        }
        self.latest = Some(result);

        Applied::Observed {
            seq,
            transition: observation.transition,
            captured,
        }
    }

    /// Release the camera, drop outstanding requests and close the session.
    pub fn stop(&mut self) -> Result<SessionSummary> {
        self.camera.stop();
        if let Some(pipeline) = self.pipeline.take() {
            if !pipeline.in_flight.is_empty() {
                log::debug!(
                    "abandoning {} detector requests in flight",
                    pipeline.in_flight.len()
                );
            }
        }
        self.stabilizer.reset();
        self.scheduler.reset();
        self.overlay.clear();
        self.latest = None;
        let summary = self.recorder.stop_session(self.clock.epoch_ms())?;
        Ok(summary)
    }

    fn next_reply(&mut self, wait: Option<Duration>) -> Option<DetectorReply> {
        let pipeline = self.pipeline.as_mut()?;
        pipeline.in_flight.retain(|handle| !handle.is_finished());
        let received = match wait {
            None => pipeline.replies.try_recv().map_err(|e| match e {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            }),
            Some(wait) => pipeline.replies.recv_timeout(wait),
        };
        received.ok()
    }

    fn submit_frame(&mut self) -> Option<u64> {
        let frame = match self.camera.snapshot() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("frame grab failed: {}", e);
                return None;
            }
        };
        let pipeline = self.pipeline.as_mut()?;
        pipeline.in_flight.retain(|handle| !handle.is_finished());
        if pipeline.in_flight.len() >= MAX_IN_FLIGHT {
            log::debug!("detector busy ({} in flight); skipping frame", MAX_IN_FLIGHT);
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let backend = self.backend.clone();
        let client = self.client;
        let replies = pipeline.replies_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("detector-{}", seq))
            .spawn(move || {
                let outcome = client.submit(&*backend, &frame.jpeg);
                // The controller may have stopped; the reply is then dropped.
                let _ = replies.send(DetectorReply { seq, outcome });
            });
        match spawned {
            Ok(handle) => {
                pipeline.in_flight.push(handle);
                Some(seq)
            }
            Err(e) => {
                log::warn!("failed to spawn detector request: {}", e);
                None
            }
        }
    }

    fn record_failure(&mut self, failure: &DetectorFailure) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        log::warn!(
            "detector failure ({} in a row): {}",
            self.consecutive_failures,
            failure
        );
        if self.status == DetectorStatus::Online
            && self.consecutive_failures >= self.settings.offline_after
        {
            self.status = DetectorStatus::Offline;
            log::error!(
                "detector offline after {} consecutive failures",
                self.consecutive_failures
            );
        }
    }

    fn record_success(&mut self) {
        if self.status == DetectorStatus::Offline {
            log::info!("detector back online");
        }
        self.status = DetectorStatus::Online;
        self.consecutive_failures = 0;
    }

    /// Snapshot the camera and append the capture to the session.
    fn capture(&mut self, direction: Direction, result: &DetectionResult) -> bool {
        let frame = match self.camera.snapshot() {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("capture snapshot failed for {}: {}", direction, e);
                return false;
            }
        };
        let primary = result
            .detections
            .iter()
            .find(|d| d.direction == direction)
            .or_else(|| result.primary());
        self.recorder.append_capture(CaptureRecord {
            captured_at_ms: self.clock.epoch_ms(),
            direction,
            image_jpeg: frame.jpeg,
            confidence: primary.map_or(0.0, |d| d.confidence),
            bbox: primary.map(|d| d.bbox),
        })
    }
}

impl Drop for DetectionController {
    fn drop(&mut self) {
        if self.camera.is_running() {
            self.camera.stop();
        }
    }
}
