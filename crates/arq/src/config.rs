//! Engine configuration and tuning constants.
//!
//! All timing values are in milliseconds, matching the `u32` millisecond
//! clock the owner drives [`crate::ArqConnection::update`] with.

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::segment::HEADER_SIZE;

/// Default maximum datagram size, header included.
pub const DEFAULT_MTU: usize = 1400;

/// Smallest MTU accepted by [`ArqConfig::validate`].
pub const MIN_MTU: usize = 50;

pub const DEFAULT_SEND_WINDOW: u16 = 32;
pub const DEFAULT_RECV_WINDOW: u16 = 128;

/// Flush cadence bounds.
pub const DEFAULT_INTERVAL: u32 = 100;
pub(crate) const MIN_INTERVAL: u32 = 10;
pub(crate) const MAX_INTERVAL: u32 = 5000;

pub const DEFAULT_INITIAL_RTO: u32 = 100;
pub const DEFAULT_MIN_RTO: u32 = 100;
/// Low latency mode uses a much smaller RTO floor.
pub const LOW_LATENCY_MIN_RTO: u32 = 30;
pub const DEFAULT_MAX_RTO: u32 = 60_000;

pub const DEFAULT_FAST_RESEND: u32 = 2;
pub const LOW_LATENCY_FAST_RESEND: u32 = 1;
pub const DEFAULT_FAST_RESEND_LIMIT: u32 = 5;

/// A segment transmitted this many times without acknowledgment kills the link.
pub const DEFAULT_DEAD_LINK: u32 = 20;

pub const DEFAULT_PROBE_INITIAL: u32 = 7_000;
pub const DEFAULT_PROBE_LIMIT: u32 = 120_000;

pub const DEFAULT_INITIAL_CWND: u32 = 4;
pub const DEFAULT_INITIAL_SSTHRESH: u32 = 64;
/// Floor for the slow start threshold after a loss.
pub(crate) const MIN_SSTHRESH: u32 = 2;

/// Default ceiling for bytes queued but not yet admitted to the send window.
pub const DEFAULT_MAX_PENDING_BYTES: usize = 8 * 1024 * 1024;

/// Largest timer value; deadlines further out no longer compare correctly
/// under wrapping millisecond arithmetic.
pub const MAX_TIMER: u32 = i32::MAX as u32;

/// Fragment indices are a single byte on the wire.
pub(crate) const MAX_FRAGMENTS: usize = u8::MAX as usize + 1;

/// Congestion behaviour selected at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Slow start, congestion avoidance and loss-driven window reduction.
    #[default]
    Normal,
    /// No congestion window, small RTO floor and eager fast retransmit.
    LowLatency,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Normal => write!(f, "normal"),
            Mode::LowLatency => write!(f, "low-latency"),
        }
    }
}

/// Configuration for one [`crate::ArqConnection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ArqConfig {
    /// Maximum size of an emitted datagram including segment headers.
    pub mtu: usize,
    /// Send window in segments.
    pub send_window: u16,
    /// Receive window in segments. Also bounds the fragments per message.
    pub recv_window: u16,
    pub mode: Mode,
    /// Flush cadence; clamped to [10, 5000].
    pub interval: u32,
    /// RTO used until the first RTT sample arrives.
    pub initial_rto: u32,
    /// RTO floor; `None` selects the mode default.
    pub min_rto: Option<u32>,
    pub max_rto: u32,
    /// Fast-ack count that triggers a fast retransmit, 0 disables it.
    /// `None` selects the mode default.
    pub fast_resend: Option<u32>,
    /// Stop fast retransmitting a segment after this many transmissions,
    /// 0 means unlimited.
    pub fast_resend_limit: u32,
    pub dead_link: u32,
    /// Delay before the first zero-window probe.
    pub probe_initial: u32,
    /// Upper bound for the probe backoff.
    pub probe_limit: u32,
    pub initial_cwnd: u32,
    pub initial_ssthresh: u32,
    /// `send` fails with `BufferFull` beyond this many pending bytes.
    pub max_pending_bytes: usize,
    /// Byte stream semantics: coalesce writes, no message boundaries.
    pub stream_mode: bool,
}

impl Default for ArqConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            send_window: DEFAULT_SEND_WINDOW,
            recv_window: DEFAULT_RECV_WINDOW,
            mode: Mode::Normal,
            interval: DEFAULT_INTERVAL,
            initial_rto: DEFAULT_INITIAL_RTO,
            min_rto: None,
            max_rto: DEFAULT_MAX_RTO,
            fast_resend: None,
            fast_resend_limit: DEFAULT_FAST_RESEND_LIMIT,
            dead_link: DEFAULT_DEAD_LINK,
            probe_initial: DEFAULT_PROBE_INITIAL,
            probe_limit: DEFAULT_PROBE_LIMIT,
            initial_cwnd: DEFAULT_INITIAL_CWND,
            initial_ssthresh: DEFAULT_INITIAL_SSTHRESH,
            max_pending_bytes: DEFAULT_MAX_PENDING_BYTES,
            stream_mode: false,
        }
    }
}

impl ArqConfig {
    /// Preset for interactive traffic.
    pub fn low_latency() -> Self {
        Self {
            mode: Mode::LowLatency,
            ..Self::default()
        }
    }

    /// Parses a TOML table, filling unspecified keys with defaults.
    ///
    /// ```toml
    /// mtu = 1200
    /// mode = "low-latency"
    /// send-window = 64
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.mtu < MIN_MTU || self.mtu > u16::MAX as usize {
            return Err(invalid(
                "mtu",
                format!("must be within [{MIN_MTU}, {}], got {}", u16::MAX, self.mtu),
            ));
        }
        if self.send_window == 0 {
            return Err(invalid("send-window", "must be greater than zero"));
        }
        if self.recv_window == 0 {
            return Err(invalid("recv-window", "must be greater than zero"));
        }
        if self.max_rto > MAX_TIMER {
            return Err(invalid(
                "max-rto",
                format!("must not exceed {MAX_TIMER}, got {}", self.max_rto),
            ));
        }
        if self.min_rto() > self.max_rto {
            return Err(invalid(
                "max-rto",
                format!("{} is below min-rto {}", self.max_rto, self.min_rto()),
            ));
        }
        if self.dead_link == 0 {
            return Err(invalid("dead-link", "must be greater than zero"));
        }
        if self.probe_limit > MAX_TIMER {
            return Err(invalid(
                "probe-limit",
                format!("must not exceed {MAX_TIMER}, got {}", self.probe_limit),
            ));
        }
        if self.probe_initial == 0 || self.probe_initial > self.probe_limit {
            return Err(invalid(
                "probe-initial",
                format!(
                    "must be within [1, probe-limit ({})], got {}",
                    self.probe_limit, self.probe_initial
                ),
            ));
        }
        if self.initial_cwnd == 0 {
            return Err(invalid("initial-cwnd", "must be greater than zero"));
        }
        if self.max_pending_bytes == 0 {
            return Err(invalid("max-pending-bytes", "must be greater than zero"));
        }
        Ok(())
    }

    /// Payload bytes carried by a full segment.
    pub fn mss(&self) -> usize {
        self.mtu - HEADER_SIZE
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto.unwrap_or(match self.mode {
            Mode::Normal => DEFAULT_MIN_RTO,
            Mode::LowLatency => LOW_LATENCY_MIN_RTO,
        })
    }

    pub fn fast_resend(&self) -> u32 {
        self.fast_resend.unwrap_or(match self.mode {
            Mode::Normal => DEFAULT_FAST_RESEND,
            Mode::LowLatency => LOW_LATENCY_FAST_RESEND,
        })
    }

    pub fn interval(&self) -> u32 {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    /// Largest number of fragments a single message may be split into.
    pub fn max_fragments(&self) -> usize {
        MAX_FRAGMENTS.min(self.recv_window as usize)
    }

    /// Largest message `send` accepts in message mode.
    pub fn max_message_size(&self) -> usize {
        self.max_fragments() * self.mss()
    }

    pub fn uses_congestion_window(&self) -> bool {
        self.mode == Mode::Normal
    }
}
