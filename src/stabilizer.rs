//! Debounced head-direction state machine.
//!
//! Per-frame classifications are noisy; a subject glancing sideways for one
//! frame must not count as a change of orientation. The stabilizer keeps a
//! sticky direction that only moves once the previous accepted direction has
//! stood for at least the debounce window.

use serde::Serialize;

use crate::clock::MonoMillis;
use crate::detect::Direction;

pub const DEFAULT_DEBOUNCE_MS: u64 = 800;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct StabilizerState {
    pub sticky_direction: Option<Direction>,
    pub last_change_ms: MonoMillis,
    pub hold_duration_ms: u64,
}

impl StabilizerState {
    /// Identifies the current hold episode, if one has started.
    pub fn episode(&self) -> Option<EpisodeKey> {
        self.sticky_direction.map(|direction| EpisodeKey {
            direction,
            started_ms: self.last_change_ms,
        })
    }
}

/// A hold episode: one sticky direction since one accepted change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct EpisodeKey {
    pub direction: Direction,
    pub started_ms: MonoMillis,
}

/// What a single observation did to the state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// First observation ever; adopted immediately.
    Bootstrap,
    /// A different direction was accepted; a new episode begins.
    Changed { from: Direction },
    /// Observation matched the sticky direction; hold duration advanced.
    Held,
    /// A different direction arrived inside the debounce window and was ignored.
    Jitter { observed: Direction },
}

impl Transition {
    pub fn starts_episode(self) -> bool {
        matches!(self, Transition::Bootstrap | Transition::Changed { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Observation {
    pub state: StabilizerState,
    pub transition: Transition,
}

#[derive(Clone, Debug)]
pub struct DirectionStabilizer {
    debounce_ms: u64,
    state: StabilizerState,
}

impl DirectionStabilizer {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            state: StabilizerState {
                sticky_direction: None,
                last_change_ms: 0,
                hold_duration_ms: 0,
            },
        }
    }

    pub fn state(&self) -> StabilizerState {
        self.state
    }

    /// Forget the sticky direction; the next observation bootstraps again.
    pub fn reset(&mut self) {
        *self = Self::new(self.debounce_ms);
    }

    /// Feed one observation. Never fails.
    ///
    /// `now` is expected to be non-decreasing; an earlier timestamp is
    /// treated as zero elapsed time.
    pub fn observe(&mut self, direction: Direction, now: MonoMillis) -> Observation {
        let since_change = now.saturating_sub(self.state.last_change_ms);

        let transition = match self.state.sticky_direction {
            None => {
                self.accept(direction, now);
                log::debug!("initial sticky direction {}", direction);
                Transition::Bootstrap
            }
            Some(sticky) if sticky != direction => {
                if since_change >= self.debounce_ms {
                    self.accept(direction, now);
                    log::debug!(
                        "direction changed {} -> {} after {}ms",
                        sticky,
                        direction,
                        since_change
                    );
                    Transition::Changed { from: sticky }
                } else {
                    log::trace!(
                        "jitter ignored: {} only {}ms after last change",
                        direction,
                        since_change
                    );
                    Transition::Jitter {
                        observed: direction,
                    }
                }
            }
            Some(_) => {
                self.state.hold_duration_ms = self.state.hold_duration_ms.max(since_change);
                Transition::Held
            }
        };

        Observation {
            state: self.state,
            transition,
        }
    }

    fn accept(&mut self, direction: Direction, now: MonoMillis) {
        self.state = StabilizerState {
            sticky_direction: Some(direction),
            last_change_ms: now,
            hold_duration_ms: 0,
        };
    }
}

impl Default for DirectionStabilizer {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
