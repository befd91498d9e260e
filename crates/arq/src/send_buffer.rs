use std::collections::VecDeque;

use crate::pool::{SegmentKey, SegmentPool};
use crate::seq;

/// Retransmission bookkeeping for one in-flight segment.
#[derive(Debug, Clone)]
pub(crate) struct SendEntry {
    pub key: SegmentKey,
    pub sn: u32,
    /// When the segment is due for retransmission.
    pub resend_at: u32,
    /// Timeout used for the last transmission, grows on every timeout.
    pub rto: u32,
    /// Acknowledgments of later segments seen while this one is outstanding.
    pub fast_ack: u32,
    /// Number of transmissions so far, 0 until first sent.
    pub xmit: u32,
}

/// Outbound segments, both those waiting for admission and those in flight.
///
/// The caller must admit pending segments with [`SendBuffer::admit`] when the
/// window allows, report acknowledgments with [`SendBuffer::ack_until`] and
/// [`SendBuffer::ack_exact`], and walk [`SendBuffer::entries_mut`] on every
/// flush to decide what needs (re)transmission.
///
/// In-flight entries live in a ring indexed by `sn - una`. Selectively
/// acknowledged entries leave a hole that is reclaimed once everything
/// before it has been acknowledged too, so the ring never holds more than
/// one send window.
pub(crate) struct SendBuffer {
    /// Segments not yet admitted into the window, in submission order.
    pending: VecDeque<SegmentKey>,
    pending_bytes: usize,
    window: VecDeque<Option<SendEntry>>,
    /// Lowest unacknowledged sequence number.
    una: u32,
    /// Sequence number the next admitted segment receives.
    nxt: u32,
}

impl SendBuffer {
    pub(crate) fn new(send_window: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            pending_bytes: 0,
            window: VecDeque::with_capacity(send_window),
            una: 0,
            nxt: 0,
        }
    }

    pub(crate) fn push(&mut self, key: SegmentKey, len: usize) {
        self.pending.push_back(key);
        self.pending_bytes += len;
    }

    /// The most recently queued segment that has not been admitted yet.
    pub(crate) fn last_pending(&self) -> Option<SegmentKey> {
        self.pending.back().copied()
    }

    /// Accounts for bytes appended to an already queued segment.
    pub(crate) fn grow_pending(&mut self, len: usize) {
        self.pending_bytes += len;
    }

    pub(crate) fn pending_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Segments sent (or about to be) and not acknowledged yet.
    pub(crate) fn in_flight(&self) -> u32 {
        self.nxt.wrapping_sub(self.una)
    }

    pub(crate) fn una(&self) -> u32 {
        self.una
    }

    /// Moves pending segments into the window while fewer than `limit` are
    /// outstanding. Returns the number admitted.
    pub(crate) fn admit(&mut self, limit: u32, pool: &mut SegmentPool) -> u32 {
        let mut admitted = 0;
        while self.in_flight() < limit {
            let Some(key) = self.pending.pop_front() else {
                break;
            };
            let segment = pool.get_mut(key);
            segment.sn = self.nxt;
            self.pending_bytes -= segment.payload.len();
            self.window.push_back(Some(SendEntry {
                key,
                sn: self.nxt,
                resend_at: 0,
                rto: 0,
                fast_ack: 0,
                xmit: 0,
            }));
            self.nxt = self.nxt.wrapping_add(1);
            admitted += 1;
        }
        admitted
    }

    /// Releases every entry with a sequence number before `una`.
    pub(crate) fn ack_until(&mut self, una: u32, pool: &mut SegmentPool) {
        if !seq::before(self.una, una) || seq::before(self.nxt, una) {
            return;
        }
        while seq::before(self.una, una) {
            match self.window.pop_front() {
                Some(slot) => {
                    if let Some(entry) = slot {
                        pool.release(entry.key);
                    }
                    self.una = self.una.wrapping_add(1);
                }
                None => break,
            }
        }
        self.skip_acknowledged();
    }

    /// Releases the entry with exactly `sn`. Returns `true` if it was still
    /// outstanding, i.e. this is its first acknowledgment.
    pub(crate) fn ack_exact(&mut self, sn: u32, pool: &mut SegmentPool) -> bool {
        if !seq::in_window(sn, self.una, self.in_flight()) {
            return false;
        }
        let index = sn.wrapping_sub(self.una) as usize;
        let released = match self.window.get_mut(index).and_then(Option::take) {
            Some(entry) => {
                pool.release(entry.key);
                true
            }
            None => false,
        };
        self.skip_acknowledged();
        released
    }

    /// Bumps the fast-ack counter of every outstanding entry sent before
    /// `max_acked`.
    pub(crate) fn note_fast_ack(&mut self, max_acked: u32) {
        for entry in self.window.iter_mut().flatten() {
            if seq::before(entry.sn, max_acked) {
                entry.fast_ack += 1;
            }
        }
    }

    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = &mut SendEntry> {
        self.window.iter_mut().flatten()
    }

    pub(crate) fn entries(&self) -> impl Iterator<Item = &SendEntry> {
        self.window.iter().flatten()
    }

    fn skip_acknowledged(&mut self) {
        while let Some(None) = self.window.front() {
            self.window.pop_front();
            self.una = self.una.wrapping_add(1);
        }
    }
}
