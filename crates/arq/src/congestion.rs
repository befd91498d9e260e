//! Loss-based congestion control.
//!
//! The window is counted in segments. Slow start adds one segment per
//! acknowledged segment until `ssthresh`, after which a byte accumulator
//! grows the window by roughly one segment per round trip. A fast
//! retransmit halves the threshold relative to the data in flight; a
//! retransmission timeout halves it relative to the window and restarts
//! from a single segment.
//!
//! ## State Transitions
//!
//! ```text
//! ┌─────────────┐  cwnd >= ssthresh   ┌──────────────────────┐
//! │  SlowStart  │────────────────────►│ CongestionAvoidance  │
//! └─────────────┘◄────────────────────└──────────────────────┘
//!                  timeout / recovery
//!                  below ssthresh
//! ```
//!
//! Flow control is separate: the admission bound is always capped by the
//! peer's advertised receive window, whatever the congestion state.

use crate::config::MIN_SSTHRESH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CongestionState {
    /// Exponential growth, one segment per acknowledged segment.
    SlowStart,
    /// Linear growth, about one segment per round trip.
    CongestionAvoidance,
}

#[derive(Debug, Clone)]
pub(crate) struct CongestionController {
    enabled: bool,
    mss: usize,
    cwnd: u32,
    ssthresh: u32,
    /// Byte accumulator driving congestion avoidance growth.
    incr: usize,
    state: CongestionState,
    total_timeouts: u64,
    total_fast_recoveries: u64,
}

impl CongestionController {
    pub(crate) fn new(enabled: bool, mss: usize, initial_cwnd: u32, initial_ssthresh: u32) -> Self {
        let cwnd = initial_cwnd.max(1);
        let ssthresh = initial_ssthresh.max(MIN_SSTHRESH);
        Self {
            enabled,
            mss,
            cwnd,
            ssthresh,
            incr: cwnd as usize * mss,
            state: Self::state_for(cwnd, ssthresh),
            total_timeouts: 0,
            total_fast_recoveries: 0,
        }
    }

    /// Number of segments that may be in flight.
    pub(crate) fn window(&self, send_window: u32, remote_window: u32) -> u32 {
        let flow = send_window.min(remote_window);
        if self.enabled {
            flow.min(self.cwnd)
        } else {
            flow
        }
    }

    /// Called when the peer's cumulative acknowledgment released `acked`
    /// segments.
    pub(crate) fn on_acked(&mut self, acked: u32, remote_window: u32) {
        if !self.enabled {
            return;
        }
        let mss = self.mss;
        for _ in 0..acked {
            if self.cwnd >= remote_window {
                break;
            }
            if self.cwnd < self.ssthresh {
                self.cwnd += 1;
                self.incr += mss;
            } else {
                if self.incr < mss {
                    self.incr = mss;
                }
                self.incr += (mss * mss) / self.incr + mss / 16;
                if (self.cwnd as usize + 1) * mss <= self.incr {
                    self.cwnd = self.incr.div_ceil(mss) as u32;
                }
            }
        }
        if self.cwnd > remote_window {
            self.cwnd = remote_window.max(1);
            self.incr = self.cwnd as usize * mss;
        }
        self.update_state();
    }

    /// Called after a flush that fast-retransmitted at least one segment.
    pub(crate) fn on_fast_retransmit(&mut self, in_flight: u32, fast_resend: u32) {
        if !self.enabled {
            return;
        }
        self.total_fast_recoveries += 1;
        self.ssthresh = (in_flight / 2).max(MIN_SSTHRESH);
        self.cwnd = self.ssthresh + fast_resend;
        self.incr = self.cwnd as usize * self.mss;
        tracing::debug!(
            cwnd = self.cwnd,
            ssthresh = self.ssthresh,
            in_flight,
            "fast retransmit, window reduced"
        );
        self.update_state();
    }

    /// Called after a flush that retransmitted at least one segment on timeout.
    pub(crate) fn on_timeout(&mut self) {
        if !self.enabled {
            return;
        }
        self.total_timeouts += 1;
        let old_cwnd = self.cwnd;
        self.ssthresh = (self.cwnd / 2).max(MIN_SSTHRESH);
        self.cwnd = 1;
        self.incr = self.mss;
        if old_cwnd != self.cwnd {
            tracing::debug!(
                old_cwnd,
                ssthresh = self.ssthresh,
                "retransmission timeout, reset to one segment"
            );
        }
        self.update_state();
    }

    fn update_state(&mut self) {
        let next = Self::state_for(self.cwnd, self.ssthresh);
        if next != self.state {
            tracing::trace!(from = ?self.state, to = ?next, cwnd = self.cwnd, "congestion state change");
            self.state = next;
        }
    }

    fn state_for(cwnd: u32, ssthresh: u32) -> CongestionState {
        if cwnd < ssthresh {
            CongestionState::SlowStart
        } else {
            CongestionState::CongestionAvoidance
        }
    }

    pub(crate) fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub(crate) fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub(crate) fn state(&self) -> CongestionState {
        self.state
    }

    pub(crate) fn total_timeouts(&self) -> u64 {
        self.total_timeouts
    }

    pub(crate) fn total_fast_recoveries(&self) -> u64 {
        self.total_fast_recoveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: usize = 1376;

    #[test]
    fn test_slow_start_is_exponential() {
        let mut cc = CongestionController::new(true, MSS, 1, 64);
        assert_eq!(cc.state(), CongestionState::SlowStart);
        // Each round trip acknowledges the whole window.
        for expected in [2, 4, 8, 16, 32] {
            let window = cc.window(128, 128);
            cc.on_acked(window, 128);
            assert_eq!(cc.cwnd(), expected);
        }
    }

    #[test]
    fn test_congestion_avoidance_is_linear() {
        let mut cc = CongestionController::new(true, MSS, 16, 16);
        assert_eq!(cc.state(), CongestionState::CongestionAvoidance);
        let start = cc.cwnd();
        // One full window of acks grows the window by about one segment.
        let window = cc.window(128, 128);
        cc.on_acked(window, 128);
        let grown = cc.cwnd() - start;
        assert!((1..=2).contains(&grown), "grew by {grown}");
    }

    #[test]
    fn test_timeout_resets_window() {
        let mut cc = CongestionController::new(true, MSS, 20, 64);
        cc.on_timeout();
        assert_eq!(cc.cwnd(), 1);
        assert_eq!(cc.ssthresh(), 10);
        assert_eq!(cc.state(), CongestionState::SlowStart);
        assert_eq!(cc.total_timeouts(), 1);

        cc.on_timeout();
        assert_eq!(cc.ssthresh(), MIN_SSTHRESH);
    }

    #[test]
    fn test_fast_retransmit_halves_relative_to_flight() {
        let mut cc = CongestionController::new(true, MSS, 30, 64);
        cc.on_fast_retransmit(24, 2);
        assert_eq!(cc.ssthresh(), 12);
        assert_eq!(cc.cwnd(), 14);
        assert_eq!(cc.total_fast_recoveries(), 1);
    }

    #[test]
    fn test_window_respects_remote_and_send_window() {
        let cc = CongestionController::new(true, MSS, 10, 64);
        assert_eq!(cc.window(32, 128), 10);
        assert_eq!(cc.window(32, 4), 4);
        assert_eq!(cc.window(8, 128), 8);
        assert_eq!(cc.window(32, 0), 0);
    }

    #[test]
    fn test_growth_capped_by_remote_window() {
        let mut cc = CongestionController::new(true, MSS, 1, 64);
        cc.on_acked(100, 6);
        assert_eq!(cc.cwnd(), 6);
    }

    #[test]
    fn test_disabled_controller_ignores_cwnd() {
        let mut cc = CongestionController::new(false, MSS, 1, 64);
        cc.on_timeout();
        assert_eq!(cc.window(32, 128), 32);
        assert_eq!(cc.total_timeouts(), 0);
    }
}
