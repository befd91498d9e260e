use std::mem;

use crate::seq;

/// Acknowledgments owed to the peer, flushed as `Ack` segments on the next
/// flush.
///
/// Every data segment inside the receive window is reported here, including
/// duplicates: a duplicate usually means our earlier acknowledgment was lost.
#[derive(Debug, Default)]
pub(crate) struct AckList {
    pending: Vec<(u32, u32)>,
}

impl AckList {
    /// Records that segment `sn`, sent by the peer at `ts`, was received.
    pub(crate) fn report(&mut self, sn: u32, ts: u32) {
        self.pending.push((sn, ts));
    }

    /// Returns the acknowledgments queued since the last call.
    pub(crate) fn take(&mut self) -> Vec<(u32, u32)> {
        mem::take(&mut self.pending)
    }

    /// Puts back a drained list so its allocation is reused.
    pub(crate) fn recycle(&mut self, mut drained: Vec<(u32, u32)>) {
        if self.pending.is_empty() {
            drained.clear();
            self.pending = drained;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Tracks the highest sequence number explicitly acknowledged by one inbound
/// datagram, which drives fast retransmit of everything sent before it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MaxAck(Option<u32>);

impl MaxAck {
    pub(crate) fn observe(&mut self, sn: u32) {
        match self.0 {
            Some(max) if !seq::before(max, sn) => {}
            _ => self.0 = Some(sn),
        }
    }

    pub(crate) fn get(self) -> Option<u32> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialization() {
        let mut acks = AckList::default();
        assert!(acks.is_empty());
        assert!(acks.take().is_empty());
    }

    #[test]
    fn test_report_and_take() {
        let mut acks = AckList::default();
        acks.report(3, 100);
        acks.report(3, 100);
        acks.report(1, 90);
        assert_eq!(acks.len(), 3);
        assert_eq!(acks.take(), vec![(3, 100), (3, 100), (1, 90)]);
        assert!(acks.is_empty());
    }

    #[test]
    fn test_recycle_keeps_capacity() {
        let mut acks = AckList::default();
        for sn in 0..16 {
            acks.report(sn, 0);
        }
        let drained = acks.take();
        let capacity = drained.capacity();
        acks.recycle(drained);
        assert!(acks.is_empty());
        assert!(acks.pending.capacity() >= capacity);
    }

    #[test]
    fn test_max_ack_is_wraparound_aware() {
        let mut max = MaxAck::default();
        assert_eq!(max.get(), None);
        max.observe(u32::MAX - 1);
        max.observe(2);
        max.observe(u32::MAX);
        assert_eq!(max.get(), Some(2));
    }
}
