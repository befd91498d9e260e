//! Zero-window probing.
//!
//! While the peer advertises a closed receive window nothing new may be
//! sent, so the peer has no segment to piggyback its window on once it
//! reopens. We periodically ask for it instead, backing off by half the
//! current wait each time up to `limit`.

use crate::seq;

#[derive(Debug, Clone)]
pub(crate) struct ProbeSchedule {
    initial: u32,
    limit: u32,
    /// Current wait between probes, 0 while the window is open.
    wait: u32,
    next_at: u32,
    /// A window probe must go out on the next flush.
    ask: bool,
    /// Our window must be reported on the next flush.
    tell: bool,
}

impl ProbeSchedule {
    pub(crate) fn new(initial: u32, limit: u32) -> Self {
        Self {
            initial,
            limit,
            wait: 0,
            next_at: 0,
            ask: false,
            tell: false,
        }
    }

    /// Re-evaluates the schedule against the peer's latest window.
    pub(crate) fn on_flush(&mut self, remote_window: u32, now: u32) {
        if remote_window != 0 {
            self.wait = 0;
            self.next_at = 0;
            return;
        }
        if self.wait == 0 {
            self.wait = self.initial;
            self.next_at = now.wrapping_add(self.wait);
        } else if seq::at_or_after(now, self.next_at) {
            self.wait = self.wait.max(self.initial);
            self.wait = self.wait.saturating_add(self.wait / 2).min(self.limit);
            self.next_at = now.wrapping_add(self.wait);
            self.ask = true;
        }
    }

    /// The peer asked for our window, or it reopened after being full.
    pub(crate) fn schedule_tell(&mut self) {
        self.tell = true;
    }

    /// Returns and clears the pending `(ask, tell)` flags.
    pub(crate) fn take(&mut self) -> (bool, bool) {
        let flags = (self.ask, self.tell);
        self.ask = false;
        self.tell = false;
        flags
    }

    /// Time the next probe is due, if the window is closed.
    pub(crate) fn next_at(&self) -> Option<u32> {
        (self.wait != 0).then_some(self.next_at)
    }

    pub(crate) fn wait(&self) -> u32 {
        self.wait
    }
}
