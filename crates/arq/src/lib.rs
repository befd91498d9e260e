//! Reliable, ordered delivery of messages over an unreliable datagram link.
//!
//! The crate implements an ARQ engine in the style of KCP: application data
//! is split into numbered segments, acknowledged selectively and
//! cumulatively, and retransmitted on timeout or on duplicate-ack evidence.
//! Sending is bounded by the local send window, the peer's advertised
//! receive window and, in [`Mode::Normal`], a loss-based congestion window.
//!
//! The engine performs no I/O of its own. The owner moves datagrams between
//! the network and an [`ArqConnection`] and drives its clock:
//!
//! ```
//! use freenet_arq::{ArqConfig, ArqConnection};
//!
//! let mut wire = Vec::new();
//! let mut conn = ArqConnection::new(7, |packet: &[u8]| wire.push(packet.to_vec()), ArqConfig::default())?;
//! conn.send(b"hello")?;
//! conn.update(0);
//! drop(conn);
//! assert_eq!(wire.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod ack_list;
pub mod config;
mod congestion;
mod connection;
pub mod errors;
mod pool;
mod probe;
mod recv_buffer;
mod rtt;
pub mod segment;
mod send_buffer;
mod seq;
mod stats;
mod time_source;

pub use config::{ArqConfig, Mode};
pub use congestion::CongestionState;
pub use connection::{ArqConnection, ConnectionState, Output};
pub use errors::{ConfigError, InputError, RecvError, SendError};
pub use segment::{peek_conversation_id, Command, Segment, SegmentHeader, Segments, HEADER_SIZE};
pub use stats::ArqStats;
pub use time_source::{InstantTimeSrc, MockTimeSource, TimeSource};
