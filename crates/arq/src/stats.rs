//! Connection statistics for telemetry and debugging.

use crate::congestion::CongestionState;
use crate::connection::ConnectionState;

/// Snapshot of an [`crate::ArqConnection`]'s state and lifetime counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArqStats {
    pub state: ConnectionState,
    /// Smoothed round-trip time (ms), 0 before the first sample.
    pub srtt: u32,
    /// Round-trip time variation (ms).
    pub rttvar: u32,
    /// Current retransmission timeout (ms).
    pub rto: u32,
    /// Number of RTT samples taken.
    pub rtt_samples: u64,
    /// Congestion window (segments).
    pub cwnd: u32,
    /// Slow start threshold (segments).
    pub ssthresh: u32,
    pub congestion_state: CongestionState,
    /// Flushes that collapsed the congestion window after a timeout.
    pub congestion_timeouts: u64,
    /// Flushes that entered fast recovery.
    pub fast_recoveries: u64,
    /// Receive window last advertised by the peer (segments).
    pub remote_window: u32,
    /// Receive window we currently advertise (segments).
    pub local_window: u16,
    /// Segments sent and not yet acknowledged.
    pub in_flight: u32,
    /// Segments queued but not yet admitted to the send window.
    pub pending_segments: usize,
    pub pending_bytes: usize,
    /// Segments waiting in the ready queue for `recv`.
    pub ready_segments: usize,
    /// Out-of-order segments waiting for a gap to fill.
    pub buffered_segments: usize,
    /// Segment transmissions including retransmissions.
    pub transmissions: u64,
    pub timeout_retransmissions: u64,
    pub fast_retransmissions: u64,
    /// Datagrams handed to the output callback.
    pub packets_sent: u64,
    pub probes_sent: u64,
    /// Inbound datagrams that were fully or partially malformed.
    pub malformed_packets: u64,
    /// Inbound segments skipped for carrying an unknown command.
    pub unknown_commands: u64,
    /// Inbound data segments already buffered or delivered.
    pub duplicate_segments: u64,
    /// Inbound data segments beyond the receive window.
    pub dropped_segments: u64,
}
