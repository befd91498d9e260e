use std::collections::VecDeque;

use crate::errors::RecvError;
use crate::pool::{SegmentKey, SegmentPool};
use crate::segment::Command;
use crate::seq;

/// Outcome of offering an inbound data segment to the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InsertResult {
    /// Buffered for the first time.
    Stored,
    /// Already buffered or already delivered; it will be re-acknowledged but
    /// should otherwise be ignored.
    Duplicate,
    /// Beyond the receive window.
    OutOfWindow,
}

/// Inbound segments, out-of-order ones and those ready for delivery.
///
/// Out-of-order segments sit in a fixed ring of `window` slots, slot `head`
/// holding the next expected sequence number. Contiguous runs are promoted
/// into the ready queue, from which [`RecvBuffer::recv`] reassembles whole
/// messages using the descending fragment index.
///
/// The ready queue normally holds at most `window` segments. A message with
/// more fragments than that is still promoted in full: the application can
/// only drain it once complete.
pub(crate) struct RecvBuffer {
    /// Buffered segments with their fragment index.
    ring: Vec<Option<(SegmentKey, u8)>>,
    head: usize,
    buffered: usize,
    ready: VecDeque<(SegmentKey, u8)>,
    /// Next sequence number expected in order.
    nxt: u32,
    window: u32,
}

impl RecvBuffer {
    pub(crate) fn new(window: u16) -> Self {
        let window = window as usize;
        Self {
            ring: vec![None; window],
            head: 0,
            buffered: 0,
            ready: VecDeque::with_capacity(window),
            nxt: 0,
            window: window as u32,
        }
    }

    pub(crate) fn nxt(&self) -> u32 {
        self.nxt
    }

    /// Data segments with `sn` before this bound are acknowledged, including
    /// already delivered ones whose earlier acknowledgment may have been lost.
    pub(crate) fn acceptable(&self, sn: u32) -> bool {
        seq::before(sn, self.nxt.wrapping_add(self.window))
    }

    /// Free receive capacity advertised to the peer, in segments.
    ///
    /// While the front message is incomplete the window stays open for its
    /// missing fragments, otherwise a sender whose message outgrows our window
    /// would wait for a window that never opens.
    pub(crate) fn free_window(&self) -> u16 {
        let free = self.window.saturating_sub(self.ready.len() as u32);
        match self.front_missing() {
            Some(missing) => free.max(missing.min(self.window)) as u16,
            None => free as u16,
        }
    }

    /// Whether the ready queue has reached the window and blocks promotion.
    pub(crate) fn is_full(&self) -> bool {
        self.ready.len() as u32 >= self.window && self.front_missing().is_none()
    }

    /// Fragments of the front message not yet in the ready queue, if it is
    /// incomplete.
    fn front_missing(&self) -> Option<u32> {
        let (_, frg) = self.ready.front()?;
        let total = *frg as u32 + 1;
        let present = self.ready.len() as u32;
        (present < total).then_some(total - present)
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn buffered_len(&self) -> usize {
        self.buffered
    }

    /// Stores a data segment, copying its payload into the pool.
    pub(crate) fn insert(
        &mut self,
        pool: &mut SegmentPool,
        conv: u32,
        sn: u32,
        frg: u8,
        payload: &[u8],
    ) -> InsertResult {
        if !seq::in_window(sn, self.nxt, self.window) {
            return if seq::before(sn, self.nxt) {
                InsertResult::Duplicate
            } else {
                InsertResult::OutOfWindow
            };
        }
        let slot = self.slot_of(sn);
        if self.ring[slot].is_some() {
            return InsertResult::Duplicate;
        }
        let key = pool.insert(conv, Command::Push, frg, payload);
        pool.get_mut(key).sn = sn;
        self.ring[slot] = Some((key, frg));
        self.buffered += 1;
        InsertResult::Stored
    }

    /// Moves the contiguous run starting at `nxt` into the ready queue while
    /// it has room.
    pub(crate) fn promote(&mut self) {
        while !self.is_full() {
            let Some(entry) = self.ring[self.head].take() else {
                break;
            };
            self.ready.push_back(entry);
            self.buffered -= 1;
            self.head = (self.head + 1) % self.ring.len();
            self.nxt = self.nxt.wrapping_add(1);
        }
    }

    /// Size of the next complete message in the ready queue.
    pub(crate) fn peek_size(&self, pool: &SegmentPool) -> Option<usize> {
        let (front, frg) = *self.ready.front()?;
        if frg == 0 {
            return Some(pool.get(front).payload.len());
        }
        if self.front_missing().is_some() {
            return None;
        }
        let mut size = 0;
        for (key, frg) in &self.ready {
            size += pool.get(*key).payload.len();
            if *frg == 0 {
                break;
            }
        }
        Some(size)
    }

    /// Copies the next complete message into `buf` and releases its segments.
    pub(crate) fn recv(&mut self, pool: &mut SegmentPool, buf: &mut [u8]) -> Result<usize, RecvError> {
        let needed = self.peek_size(pool).ok_or(RecvError::WouldBlock)?;
        if needed > buf.len() {
            return Err(RecvError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let mut written = 0;
        while let Some((key, frg)) = self.ready.pop_front() {
            let segment = pool.get(key);
            let len = segment.payload.len();
            let last = frg == 0;
            buf[written..written + len].copy_from_slice(&segment.payload);
            written += len;
            pool.release(key);
            if last {
                break;
            }
        }
        debug_assert_eq!(written, needed);
        Ok(written)
    }

    fn slot_of(&self, sn: u32) -> usize {
        let offset = sn.wrapping_sub(self.nxt) as usize;
        (self.head + offset) % self.ring.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(buf: &mut RecvBuffer, pool: &mut SegmentPool, sn: u32, frg: u8, data: &[u8]) -> InsertResult {
        let result = buf.insert(pool, 1, sn, frg, data);
        buf.promote();
        result
    }

    #[test]
    fn test_in_order_delivery() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(8);
        assert_eq!(store(&mut buf, &mut pool, 0, 0, b"hello"), InsertResult::Stored);
        assert_eq!(buf.peek_size(&pool), Some(5));

        let mut out = [0u8; 16];
        assert_eq!(buf.recv(&mut pool, &mut out), Ok(5));
        assert_eq!(&out[..5], b"hello");
        assert_eq!(buf.recv(&mut pool, &mut out), Err(RecvError::WouldBlock));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn test_reverse_order_fragments_reassemble() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(8);
        store(&mut buf, &mut pool, 2, 0, b"ccc");
        store(&mut buf, &mut pool, 1, 1, b"bb");
        assert_eq!(buf.peek_size(&pool), None);
        assert_eq!(buf.ready_len(), 0);
        assert_eq!(buf.buffered_len(), 2);

        store(&mut buf, &mut pool, 0, 2, b"a");
        assert_eq!(buf.ready_len(), 3);
        assert_eq!(buf.peek_size(&pool), Some(6));

        let mut out = [0u8; 6];
        assert_eq!(buf.recv(&mut pool, &mut out), Ok(6));
        assert_eq!(&out, b"abbccc");
    }

    #[test]
    fn test_duplicates_and_out_of_window() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(4);
        assert_eq!(store(&mut buf, &mut pool, 1, 0, b"x"), InsertResult::Stored);
        assert_eq!(store(&mut buf, &mut pool, 1, 0, b"x"), InsertResult::Duplicate);
        assert_eq!(store(&mut buf, &mut pool, 4, 0, b"x"), InsertResult::OutOfWindow);
        assert!(!buf.acceptable(4));
        assert!(buf.acceptable(3));

        store(&mut buf, &mut pool, 0, 0, b"y");
        assert_eq!(buf.nxt(), 2);
        // Already delivered to the ready queue.
        assert_eq!(store(&mut buf, &mut pool, 0, 0, b"y"), InsertResult::Duplicate);
        assert!(buf.acceptable(0));
    }

    #[test]
    fn test_small_buffer_keeps_message() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(4);
        store(&mut buf, &mut pool, 0, 0, b"abcdef");
        let mut small = [0u8; 3];
        assert_eq!(
            buf.recv(&mut pool, &mut small),
            Err(RecvError::BufferTooSmall {
                needed: 6,
                available: 3
            })
        );
        let mut out = [0u8; 6];
        assert_eq!(buf.recv(&mut pool, &mut out), Ok(6));
    }

    #[test]
    fn test_full_ready_queue_stops_promotion_and_window() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(2);
        store(&mut buf, &mut pool, 0, 0, b"a");
        store(&mut buf, &mut pool, 1, 0, b"b");
        assert!(buf.is_full());
        assert_eq!(buf.free_window(), 0);
        // Buffered but held back while the application is not reading.
        assert_eq!(store(&mut buf, &mut pool, 2, 0, b"c"), InsertResult::Stored);
        assert_eq!(buf.ready_len(), 2);
        assert_eq!(buf.buffered_len(), 1);
        assert_eq!(store(&mut buf, &mut pool, 4, 0, b"e"), InsertResult::OutOfWindow);

        let mut out = [0u8; 1];
        buf.recv(&mut pool, &mut out).unwrap();
        assert_eq!(buf.free_window(), 1);
        buf.promote();
        assert_eq!(buf.buffered_len(), 0);
        assert_eq!(buf.free_window(), 0);
        buf.recv(&mut pool, &mut out).unwrap();
        assert_eq!(&out, b"b");
        assert_eq!(buf.free_window(), 1);
    }

    #[test]
    fn test_message_larger_than_window_completes() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(2);
        store(&mut buf, &mut pool, 0, 3, b"a");
        store(&mut buf, &mut pool, 1, 2, b"b");
        // Two of four fragments ready, the window stays open for the rest.
        assert_eq!(buf.ready_len(), 2);
        assert!(!buf.is_full());
        assert_eq!(buf.free_window(), 2);
        assert_eq!(buf.peek_size(&pool), None);

        store(&mut buf, &mut pool, 2, 1, b"c");
        assert_eq!(buf.free_window(), 1);
        store(&mut buf, &mut pool, 3, 0, b"d");
        assert_eq!(buf.ready_len(), 4);
        assert!(buf.is_full());
        assert_eq!(buf.free_window(), 0);

        let mut out = [0u8; 4];
        assert_eq!(buf.recv(&mut pool, &mut out), Ok(4));
        assert_eq!(&out, b"abcd");
        assert_eq!(buf.free_window(), 2);
    }

    #[test]
    fn test_ring_wraps_around() {
        let mut pool = SegmentPool::new(16);
        let mut buf = RecvBuffer::new(3);
        let mut out = [0u8; 4];
        for sn in 0..10u32 {
            store(&mut buf, &mut pool, sn, 0, &sn.to_le_bytes());
            assert_eq!(buf.recv(&mut pool, &mut out), Ok(4));
            assert_eq!(u32::from_le_bytes(out), sn);
        }
    }
}
