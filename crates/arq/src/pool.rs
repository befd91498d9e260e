//! Slot-indexed segment storage shared by the send and receive buffers.
//!
//! Queues hold [`SegmentKey`]s rather than segments. Released slots are
//! reused by the slab and released payload buffers are kept for the next
//! segment, so steady-state traffic does not allocate on the retransmission
//! path.

use bytes::BytesMut;
use slab::Slab;

use crate::segment::{Command, Segment};

pub(crate) type SegmentKey = usize;

/// Payload buffers kept around for reuse.
const MAX_SPARE_BUFFERS: usize = 64;

pub(crate) struct SegmentPool {
    slots: Slab<Segment>,
    spare: Vec<BytesMut>,
    buffer_capacity: usize,
}

impl SegmentPool {
    pub(crate) fn new(buffer_capacity: usize) -> Self {
        Self {
            slots: Slab::new(),
            spare: Vec::new(),
            buffer_capacity,
        }
    }

    /// Stores a new segment whose payload is a copy of `data`.
    pub(crate) fn insert(&mut self, conv: u32, cmd: Command, frg: u8, data: &[u8]) -> SegmentKey {
        let mut payload = self
            .spare
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity));
        payload.extend_from_slice(data);
        self.slots.insert(Segment {
            conv,
            cmd,
            frg,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            payload,
        })
    }

    pub(crate) fn get(&self, key: SegmentKey) -> &Segment {
        &self.slots[key]
    }

    pub(crate) fn get_mut(&mut self, key: SegmentKey) -> &mut Segment {
        &mut self.slots[key]
    }

    /// Frees the slot and recycles its payload buffer.
    pub(crate) fn release(&mut self, key: SegmentKey) {
        let mut segment = self.slots.remove(key);
        if self.spare.len() < MAX_SPARE_BUFFERS {
            segment.payload.clear();
            self.spare.push(segment.payload);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_reused() {
        let mut pool = SegmentPool::new(64);
        let a = pool.insert(1, Command::Push, 0, b"one");
        let b = pool.insert(1, Command::Push, 0, b"two");
        assert_eq!(pool.len(), 2);
        assert_eq!(&pool.get(b).payload[..], b"two");

        pool.release(a);
        let c = pool.insert(1, Command::Push, 0, b"three");
        assert_eq!(c, a);
        assert_eq!(&pool.get(c).payload[..], b"three");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_released_buffer_is_cleared_before_reuse() {
        let mut pool = SegmentPool::new(8);
        let a = pool.insert(1, Command::Push, 0, b"long payload");
        pool.release(a);
        let b = pool.insert(1, Command::Push, 0, b"x");
        assert_eq!(&pool.get(b).payload[..], b"x");
    }
}
