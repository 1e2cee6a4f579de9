//! Screenshot trigger policy.
//!
//! A capture fires once per hold episode, on the first tick whose hold
//! duration falls in `[window_start_ms, window_end_ms)` while the sticky
//! direction is not FRONT. A tick that jumps straight past the window (for
//! example after a suspended process) produces no capture for that episode.

use std::collections::HashSet;

use crate::detect::Direction;
use crate::stabilizer::EpisodeKey;

pub const DEFAULT_WINDOW_START_MS: u64 = 3_000;
pub const DEFAULT_WINDOW_END_MS: u64 = 6_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureWindow {
    pub start_ms: u64,
    pub end_ms: u64,
}

impl CaptureWindow {
    pub fn contains(&self, hold_ms: u64) -> bool {
        (self.start_ms..self.end_ms).contains(&hold_ms)
    }
}

impl Default for CaptureWindow {
    fn default() -> Self {
        Self {
            start_ms: DEFAULT_WINDOW_START_MS,
            end_ms: DEFAULT_WINDOW_END_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureDecision {
    Capture(EpisodeKey),
    Skip,
}

impl CaptureDecision {
    pub fn is_capture(&self) -> bool {
        matches!(self, CaptureDecision::Capture(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct CaptureScheduler {
    window: CaptureWindow,
    captured: HashSet<EpisodeKey>,
}

impl CaptureScheduler {
    pub fn new(window: CaptureWindow) -> Self {
        Self {
            window,
            captured: HashSet::new(),
        }
    }

    pub fn on_tick(
        &mut self,
        sticky: Direction,
        hold_duration_ms: u64,
        episode: EpisodeKey,
    ) -> CaptureDecision {
        if sticky == Direction::Front || !self.window.contains(hold_duration_ms) {
            return CaptureDecision::Skip;
        }
        if !self.captured.insert(episode) {
            log::trace!("episode {:?} already captured", episode);
            return CaptureDecision::Skip;
        }
        log::info!(
            "capture window open: {} held for {}ms",
            sticky,
            hold_duration_ms
        );
        CaptureDecision::Capture(episode)
    }

    /// Forget captured episodes. Called when a new episode starts and when a
    /// session starts or stops. Keys embed the episode start, so a new episode
    /// could never collide with an old key; this only bounds memory.
    pub fn reset(&mut self) {
        self.captured.clear();
    }
}
