// Playback - Cursor over a precomputed trajectory

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackState {
    Paused,
    Running,
}

/// The only mutable piece of a session: which step is on screen and how fast it moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackCursor {
    index: usize,
    step_count: usize,
    speed: usize,
    state: PlaybackState,
}

impl PlaybackCursor {
    pub const DEFAULT_SPEED: usize = 10;

    /// Paused at step 0
    pub fn new(step_count: usize, speed: usize) -> Self {
        Self {
            index: 0,
            step_count,
            speed,
            state: PlaybackState::Paused,
        }
    }

    /// Advance by `speed` while running. Wraps to 0 once the next index would
    /// reach the last sample.
    pub fn tick(&mut self) -> usize {
        if self.state == PlaybackState::Running && self.step_count > 0 {
            self.index = match self.index.checked_add(self.speed) {
                Some(next) if next < self.step_count - 1 => next,
                _ => 0,
            };
        }
        self.index
    }

    /// Back to step 0 for a trajectory of `step_count` samples. Speed and state are kept.
    pub fn reset(&mut self, step_count: usize) {
        self.index = 0;
        self.step_count = step_count;
    }

    /// Applies from the next tick on
    pub fn set_speed(&mut self, speed: usize) {
        self.speed = speed;
    }

    pub fn start(&mut self) {
        self.state = PlaybackState::Running;
    }

    pub fn resume(&mut self) {
        self.start();
    }

    pub fn pause(&mut self) {
        self.state = PlaybackState::Paused;
    }

    /// Play/pause button
    pub fn toggle(&mut self) -> PlaybackState {
        self.state = match self.state {
            PlaybackState::Paused => PlaybackState::Running,
            PlaybackState::Running => PlaybackState::Paused,
        };
        self.state
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn speed(&self) -> usize {
        self.speed
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlaybackState::Running
    }

    /// Fraction of the trajectory already shown, in [0, 1)
    pub fn progress(&self) -> f64 {
        if self.step_count == 0 {
            0.0
        } else {
            self.index as f64 / self.step_count as f64
        }
    }
}

impl Default for PlaybackCursor {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_SPEED)
    }
}
