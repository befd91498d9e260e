//! Millisecond clocks for driving [`crate::ArqConnection::update`].
//!
//! The engine itself never reads a clock. Owners pick a [`TimeSource`] and
//! pass its reading in; tests substitute [`MockTimeSource`] to replay exact
//! schedules.

use std::time::Instant;

pub trait TimeSource {
    /// Current time in milliseconds. Wraps around after about 49 days, which
    /// the engine tolerates.
    fn now_millis(&self) -> u32;
}

/// Milliseconds elapsed since the source was created.
#[derive(Clone, Copy, Debug)]
pub struct InstantTimeSrc {
    epoch: Instant,
}

impl InstantTimeSrc {
    pub fn new() -> Self {
        InstantTimeSrc {
            epoch: Instant::now(),
        }
    }
}

impl Default for InstantTimeSrc {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for InstantTimeSrc {
    fn now_millis(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }
}

/// Manually advanced clock.
#[derive(Clone, Debug, Default)]
pub struct MockTimeSource {
    current: u32,
}

impl MockTimeSource {
    pub fn new(start: u32) -> Self {
        MockTimeSource { current: start }
    }

    pub fn advance_time(&mut self, millis: u32) {
        self.current = self.current.wrapping_add(millis);
    }
}

impl TimeSource for MockTimeSource {
    fn now_millis(&self) -> u32 {
        self.current
    }
}
