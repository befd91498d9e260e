//! The ARQ engine for one logical connection.
//!
//! An [`ArqConnection`] is a purely reactive state machine. It owns no
//! socket, timer or thread: the owner feeds it application bytes through
//! [`ArqConnection::send`], inbound datagrams through
//! [`ArqConnection::input`] and the current time through
//! [`ArqConnection::update`]. Outbound datagrams are produced only while
//! `update` flushes, and are handed synchronously to the [`Output`] the
//! connection was created with. Identical call sequences with identical
//! timestamps produce identical output.
//!
//! ## State Machine
//!
//! ```text
//! ┌──────────┐  peer window closed  ┌───────────┐
//! │  Active  │─────────────────────►│  Probing  │
//! └────┬─────┘◄─────────────────────└─────┬─────┘
//!      │        peer window reopened      │
//!      │                                  │
//!      │  segment sent `dead_link` times  │
//!      ▼                                  ▼
//! ┌──────────────────────────────────────────────┐
//! │                    Dead                      │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! The connection is `Send` but not `Sync`: exactly one caller drives it at a
//! time. Share it across threads behind a lock of the owner's choosing.

use std::cell::Cell;
use std::marker::PhantomData;

use bytes::BytesMut;

use crate::ack_list::{AckList, MaxAck};
use crate::config::{ArqConfig, Mode};
use crate::congestion::CongestionController;
use crate::errors::{ConfigError, InputError, RecvError, SendError};
use crate::pool::SegmentPool;
use crate::probe::ProbeSchedule;
use crate::recv_buffer::{InsertResult, RecvBuffer};
use crate::rtt::RttEstimator;
use crate::segment::{Command, SegmentHeader, Segments, HEADER_SIZE};
use crate::send_buffer::{SendBuffer, SendEntry};
use crate::seq;
use crate::stats::ArqStats;
use crate::time_source::TimeSource;


/// A flush schedule further than this from the clock is resynchronised.
const MAX_CLOCK_SKEW: i32 = 10_000;

/// Receives every datagram the engine emits.
///
/// Called synchronously from within [`ArqConnection::update`]; it must not
/// block and must not call back into the connection.
pub trait Output {
    fn output(&mut self, packet: &[u8]);
}

impl<F> Output for F
where
    F: FnMut(&[u8]),
{
    fn output(&mut self, packet: &[u8]) {
        self(packet)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Normal operation.
    Active,
    /// The peer advertises a closed receive window; probes are being sent.
    Probing,
    /// A segment exceeded the retransmission limit. Terminal.
    Dead,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    transmissions: u64,
    timeout_retransmissions: u64,
    fast_retransmissions: u64,
    packets_sent: u64,
    probes_sent: u64,
    malformed_packets: u64,
    unknown_commands: u64,
    duplicate_segments: u64,
    dropped_segments: u64,
}

/// Reliable, ordered delivery for one conversation.
pub struct ArqConnection<O: Output> {
    conv: u32,
    config: ArqConfig,
    mss: usize,
    output: O,
    pool: SegmentPool,
    send_buf: SendBuffer,
    recv_buf: RecvBuffer,
    acks: AckList,
    rtt: RttEstimator,
    cc: CongestionController,
    probe: ProbeSchedule,
    /// Receive window last advertised by the peer.
    remote_window: u32,
    /// Time of the latest `update` call.
    current: u32,
    next_flush: u32,
    updated: bool,
    dead: bool,
    counters: Counters,
    /// Datagram being assembled during a flush.
    packet: BytesMut,
    _not_sync: PhantomData<Cell<()>>,
}

impl<O: Output> ArqConnection<O> {
    pub fn new(conv: u32, output: O, config: ArqConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mss = config.mss();
        let rtt = RttEstimator::new(
            config.initial_rto,
            config.min_rto(),
            config.max_rto,
            config.interval(),
        );
        let cc = CongestionController::new(
            config.uses_congestion_window(),
            mss,
            config.initial_cwnd,
            config.initial_ssthresh,
        );
        tracing::debug!(conv, mode = %config.mode, mtu = config.mtu, "creating ARQ connection");
        Ok(Self {
            conv,
            mss,
            output,
            pool: SegmentPool::new(mss),
            send_buf: SendBuffer::new(config.send_window as usize),
            recv_buf: RecvBuffer::new(config.recv_window),
            acks: AckList::default(),
            rtt,
            cc,
            probe: ProbeSchedule::new(config.probe_initial, config.probe_limit),
            remote_window: config.recv_window as u32,
            current: 0,
            next_flush: 0,
            updated: false,
            dead: false,
            counters: Counters::default(),
            packet: BytesMut::with_capacity(config.mtu),
            config,
            _not_sync: PhantomData,
        })
    }

    pub fn conversation_id(&self) -> u32 {
        self.conv
    }

    pub fn config(&self) -> &ArqConfig {
        &self.config
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    pub fn state(&self) -> ConnectionState {
        if self.dead {
            ConnectionState::Dead
        } else if self.remote_window == 0 {
            ConnectionState::Probing
        } else {
            ConnectionState::Active
        }
    }

    /// Queues `data` for delivery to the peer.
    ///
    /// In message mode `data` is delivered as one unit by the peer's `recv`.
    /// Nothing is transmitted until the next flush.
    pub fn send(&mut self, mut data: &[u8]) -> Result<(), SendError> {
        if self.dead {
            return Err(SendError::LinkDead);
        }

        let limit = self.config.max_pending_bytes;
        let pending = self.send_buf.pending_bytes();
        if pending + data.len() > limit {
            return Err(SendError::BufferFull { pending, limit });
        }

        if self.config.stream_mode {
            if let Some(key) = self.send_buf.last_pending() {
                let segment = self.pool.get_mut(key);
                let room = self.mss - segment.payload.len();
                let extra = room.min(data.len());
                if extra > 0 {
                    segment.payload.extend_from_slice(&data[..extra]);
                    self.send_buf.grow_pending(extra);
                    data = &data[extra..];
                }
            }
            if data.is_empty() {
                return Ok(());
            }
        }

        let count = data.len().div_ceil(self.mss).max(1);
        if !self.config.stream_mode && count > self.config.max_fragments() {
            return Err(SendError::MessageTooLarge {
                size: data.len(),
                max_size: self.config.max_message_size(),
            });
        }

        if data.is_empty() {
            self.queue_fragment(0, &[]);
        }
        for (i, chunk) in data.chunks(self.mss).enumerate() {
            let frg = if self.config.stream_mode {
                0
            } else {
                (count - 1 - i) as u8
            };
            self.queue_fragment(frg, chunk);
        }
        tracing::trace!(conv = self.conv, len = data.len(), fragments = count, "queued message");
        Ok(())
    }

    fn queue_fragment(&mut self, frg: u8, chunk: &[u8]) {
        let key = self.pool.insert(self.conv, Command::Push, frg, chunk);
        self.send_buf.push(key, chunk.len());
    }

    /// Copies the next complete message into `buf`.
    ///
    /// Fails with [`RecvError::BufferTooSmall`] without consuming anything if
    /// the message does not fit; [`ArqConnection::peek_size`] tells how much
    /// room is needed.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        if self.dead {
            return Err(RecvError::LinkDead);
        }
        let was_full = self.recv_buf.is_full();
        let len = self.recv_buf.recv(&mut self.pool, buf)?;
        self.recv_buf.promote();
        if was_full && !self.recv_buf.is_full() {
            // The peer may be probing a window it saw closed.
            self.probe.schedule_tell();
        }
        Ok(len)
    }

    /// Size of the next complete message, if one is ready.
    pub fn peek_size(&self) -> Option<usize> {
        self.recv_buf.peek_size(&self.pool)
    }

    /// Segments queued or in flight.
    pub fn waiting_send(&self) -> usize {
        self.send_buf.pending_len() + self.send_buf.in_flight() as usize
    }

    /// Processes one datagram received from the peer.
    ///
    /// Returns an error only if nothing in the datagram was usable. A
    /// malformed tail after valid segments is counted and otherwise ignored.
    pub fn input(&mut self, packet: &[u8]) -> Result<(), InputError> {
        if self.dead {
            return Err(InputError::LinkDead);
        }
        if packet.is_empty() {
            self.counters.malformed_packets += 1;
            return Err(InputError::Truncated { len: 0 });
        }

        let prev_una = self.send_buf.una();
        let mut accepted = 0usize;
        let mut max_ack = MaxAck::default();
        let mut first_error = None;

        for item in Segments::new(packet) {
            let (header, payload) = match item {
                Ok(segment) => segment,
                Err(err) => {
                    first_error.get_or_insert(err);
                    break;
                }
            };
            if header.conv != self.conv {
                first_error.get_or_insert(InputError::ConversationMismatch {
                    expected: self.conv,
                    actual: header.conv,
                });
                break;
            }
            let Some(cmd) = header.command() else {
                self.counters.unknown_commands += 1;
                first_error.get_or_insert(InputError::UnknownCommand(header.cmd));
                continue;
            };
            accepted += 1;
            self.remote_window = header.wnd as u32;

            match cmd {
                Command::Ack => {
                    self.on_ack(&header);
                    max_ack.observe(header.sn);
                    self.send_buf.ack_until(header.una, &mut self.pool);
                }
                Command::Push => {
                    self.send_buf.ack_until(header.una, &mut self.pool);
                    self.on_push(&header, payload);
                }
                Command::WindowProbe => {
                    self.send_buf.ack_until(header.una, &mut self.pool);
                    self.probe.schedule_tell();
                }
                Command::WindowTell => {
                    self.send_buf.ack_until(header.una, &mut self.pool);
                }
            }
        }

        if let Some(max) = max_ack.get() {
            self.send_buf.note_fast_ack(max);
        }

        let released = seq::diff(self.send_buf.una(), prev_una);
        if released > 0 {
            self.cc.on_acked(released as u32, self.remote_window);
        }

        match (accepted, first_error) {
            (0, Some(err)) => {
                self.counters.malformed_packets += 1;
                tracing::debug!(conv = self.conv, error = %err, "dropping inbound packet");
                Err(err)
            }
            (_, Some(err)) => {
                self.counters.malformed_packets += 1;
                tracing::debug!(conv = self.conv, error = %err, accepted, "ignoring malformed tail");
                Ok(())
            }
            (_, None) => Ok(()),
        }
    }

    fn on_ack(&mut self, header: &SegmentHeader) {
        if self.send_buf.ack_exact(header.sn, &mut self.pool) {
            let rtt = seq::diff(self.current, header.ts);
            if rtt >= 0 {
                self.rtt.on_sample(rtt as u32);
                tracing::trace!(
                    conv = self.conv,
                    sn = header.sn,
                    rtt,
                    rto = self.rtt.rto(),
                    "ack"
                );
            }
        }
    }

    fn on_push(&mut self, header: &SegmentHeader, payload: &[u8]) {
        if !self.recv_buf.acceptable(header.sn) {
            self.counters.dropped_segments += 1;
            return;
        }
        self.acks.report(header.sn, header.ts);
        match self
            .recv_buf
            .insert(&mut self.pool, self.conv, header.sn, header.frg, payload)
        {
            InsertResult::Stored => self.recv_buf.promote(),
            InsertResult::Duplicate => self.counters.duplicate_segments += 1,
            InsertResult::OutOfWindow => self.counters.dropped_segments += 1,
        }
    }

    /// Advances the engine clock to `now` (milliseconds) and flushes if the
    /// flush interval has elapsed.
    ///
    /// Call this every few tens of milliseconds, or at the time returned by
    /// [`ArqConnection::check`].
    pub fn update(&mut self, now: u32) {
        if self.dead {
            return;
        }
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.next_flush = now;
        }

        let mut slap = seq::diff(now, self.next_flush);
        if !(-MAX_CLOCK_SKEW..MAX_CLOCK_SKEW).contains(&slap) {
            self.next_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            let interval = self.config.interval();
            self.next_flush = self.next_flush.wrapping_add(interval);
            if seq::at_or_after(now, self.next_flush) {
                self.next_flush = now.wrapping_add(interval);
            }
            self.flush();
        } else if self.check(now) == now {
            // A retransmission or probe fell due between regular flushes.
            self.flush();
        }
    }

    /// Reads the time from `time_source` and calls [`ArqConnection::update`].
    pub fn update_with<T: TimeSource>(&mut self, time_source: &T) {
        self.update(time_source.now_millis());
    }

    /// Latest time at which `update` should be called next: the earlier of
    /// the next flush and the earliest retransmission deadline.
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated || self.dead {
            return now;
        }
        let mut next_flush = self.next_flush;
        let slap = seq::diff(now, next_flush);
        if !(-MAX_CLOCK_SKEW..MAX_CLOCK_SKEW).contains(&slap) {
            next_flush = now;
        }
        if seq::at_or_after(now, next_flush) {
            return now;
        }

        let mut wait = seq::diff(next_flush, now) as u32;
        if let Some(probe_at) = self.probe.next_at() {
            let until = seq::diff(probe_at, now);
            if until <= 0 {
                return now;
            }
            wait = wait.min(until as u32);
        }
        for entry in self.send_buf.entries() {
            let until = seq::diff(entry.resend_at, now);
            if until <= 0
                || fast_resend_due(entry, self.config.fast_resend(), self.config.fast_resend_limit)
            {
                return now;
            }
            wait = wait.min(until as u32);
        }
        now.wrapping_add(wait.min(self.config.interval()))
    }

    fn flush(&mut self) {
        let current = self.current;
        let wnd = self.recv_buf.free_window();
        let una = self.recv_buf.nxt();
        let mtu = self.config.mtu;
        let conv = self.conv;

        let control = |cmd: Command, sn: u32, ts: u32| SegmentHeader {
            conv,
            cmd: cmd as u8,
            frg: 0,
            wnd,
            ts,
            sn,
            una,
            len: 0,
        };

        if !self.acks.is_empty() {
            let acks = self.acks.take();
            for &(sn, ts) in &acks {
                let header = control(Command::Ack, sn, ts);
                self.make_room(HEADER_SIZE);
                header.encode(&mut self.packet);
            }
            self.acks.recycle(acks);
        }

        self.probe.on_flush(self.remote_window, current);
        let (ask, tell) = self.probe.take();
        if ask {
            let header = control(Command::WindowProbe, 0, 0);
            self.make_room(HEADER_SIZE);
            header.encode(&mut self.packet);
            self.counters.probes_sent += 1;
            tracing::debug!(conv = self.conv, wait = self.probe.wait(), "probing closed window");
        }
        if tell {
            let header = control(Command::WindowTell, 0, 0);
            self.make_room(HEADER_SIZE);
            header.encode(&mut self.packet);
        }

        let limit = self
            .cc
            .window(self.config.send_window as u32, self.remote_window);
        self.send_buf.admit(limit, &mut self.pool);

        let fast_resend = self.config.fast_resend();
        let fast_resend_limit = self.config.fast_resend_limit;
        let dead_link = self.config.dead_link;
        let rto = self.rtt.rto();
        let max_rto = self.rtt.max_rto();
        let mode = self.config.mode;

        let mut lost = false;
        let mut fast = false;
        let mut newly_dead = None;

        for entry in self.send_buf.entries_mut() {
            let retransmit = if entry.xmit == 0 {
                entry.rto = rto;
                false
            } else if seq::at_or_after(current, entry.resend_at) {
                entry.rto = match mode {
                    Mode::Normal => entry.rto.saturating_add(entry.rto.max(rto)),
                    Mode::LowLatency => entry.rto.saturating_add(rto / 2),
                }
                .min(max_rto);
                lost = true;
                self.counters.timeout_retransmissions += 1;
                true
            } else if fast_resend_due(entry, fast_resend, fast_resend_limit) {
                entry.fast_ack = 0;
                fast = true;
                self.counters.fast_retransmissions += 1;
                true
            } else {
                continue;
            };

            entry.xmit += 1;
            entry.resend_at = current.wrapping_add(entry.rto);
            self.counters.transmissions += 1;

            let segment = self.pool.get_mut(entry.key);
            segment.ts = current;
            segment.wnd = wnd;
            segment.una = una;

            make_room(
                &mut self.output,
                &mut self.packet,
                &mut self.counters.packets_sent,
                mtu,
                segment.encoded_len(),
            );
            segment.encode(&mut self.packet);

            if retransmit {
                tracing::trace!(
                    conv = self.conv,
                    sn = entry.sn,
                    xmit = entry.xmit,
                    rto = entry.rto,
                    "retransmitting segment"
                );
            }
            if entry.xmit >= dead_link && newly_dead.is_none() {
                newly_dead = Some((entry.sn, entry.xmit));
            }
        }

        if !self.packet.is_empty() {
            emit(&mut self.output, &mut self.packet, &mut self.counters.packets_sent);
        }

        if fast {
            self.cc
                .on_fast_retransmit(self.send_buf.in_flight(), self.config.fast_resend());
        }
        if lost {
            self.cc.on_timeout();
        }
        if let Some((sn, xmit)) = newly_dead {
            self.dead = true;
            tracing::warn!(conv = self.conv, sn, xmit, "retransmission limit exceeded, link is dead");
        }
    }

    fn make_room(&mut self, needed: usize) {
        make_room(
            &mut self.output,
            &mut self.packet,
            &mut self.counters.packets_sent,
            self.config.mtu,
            needed,
        );
    }

    pub fn stats(&self) -> ArqStats {
        ArqStats {
            state: self.state(),
            srtt: self.rtt.srtt(),
            rttvar: self.rtt.rttvar(),
            rto: self.rtt.rto(),
            rtt_samples: self.rtt.samples(),
            cwnd: self.cc.cwnd(),
            ssthresh: self.cc.ssthresh(),
            congestion_state: self.cc.state(),
            congestion_timeouts: self.cc.total_timeouts(),
            fast_recoveries: self.cc.total_fast_recoveries(),
            remote_window: self.remote_window,
            local_window: self.recv_buf.free_window(),
            in_flight: self.send_buf.in_flight(),
            pending_segments: self.send_buf.pending_len(),
            pending_bytes: self.send_buf.pending_bytes(),
            ready_segments: self.recv_buf.ready_len(),
            buffered_segments: self.recv_buf.buffered_len(),
            transmissions: self.counters.transmissions,
            timeout_retransmissions: self.counters.timeout_retransmissions,
            fast_retransmissions: self.counters.fast_retransmissions,
            packets_sent: self.counters.packets_sent,
            probes_sent: self.counters.probes_sent,
            malformed_packets: self.counters.malformed_packets,
            unknown_commands: self.counters.unknown_commands,
            duplicate_segments: self.counters.duplicate_segments,
            dropped_segments: self.counters.dropped_segments,
        }
    }
}

/// Emits the datagram under construction if `needed` more bytes would not
/// fit in it.
fn make_room<O: Output>(
    output: &mut O,
    packet: &mut BytesMut,
    packets_sent: &mut u64,
    mtu: usize,
    needed: usize,
) {
    if !packet.is_empty() && packet.len() + needed > mtu {
        emit(output, packet, packets_sent);
    }
}

fn emit<O: Output>(output: &mut O, packet: &mut BytesMut, packets_sent: &mut u64) {
    output.output(&packet[..]);
    *packets_sent += 1;
    packet.clear();
}

/// Whether enough later segments were acknowledged to resend `entry` without
/// waiting for its timeout. A `threshold` of 0 disables fast retransmit and a
/// `limit` of 0 lifts the cap on transmissions.
fn fast_resend_due(entry: &SendEntry, threshold: u32, limit: u32) -> bool {
    threshold != 0 && entry.fast_ack >= threshold && (limit == 0 || entry.xmit <= limit)
}

impl<O: Output> std::fmt::Debug for ArqConnection<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArqConnection")
            .field("conv", &self.conv)
            .field("state", &self.state())
            .field("una", &self.send_buf.una())
            .field("rcv_nxt", &self.recv_buf.nxt())
            .field("remote_window", &self.remote_window)
            .field("pending_acks", &self.acks.len())
            .field("segments", &self.pool.len())
            .finish()
    }
}
