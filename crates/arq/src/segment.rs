//! The wire unit exchanged between two engines and its fixed-layout codec.
//!
//! Every segment starts with a 24 byte little-endian header followed by
//! `len` payload bytes. A single datagram may carry several segments back to
//! back; [`Segments`] walks them without copying.
//!
//! ```text
//! 0        4     5     6        8        12       16       20       24
//! +--------+-----+-----+--------+--------+--------+--------+--------+-------
//! |  conv  | cmd | frg |  wnd   |   ts   |   sn   |  una   |  len   | data..
//! +--------+-----+-----+--------+--------+--------+--------+--------+-------
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::InputError;

/// Size of the fixed segment header in bytes.
pub const HEADER_SIZE: usize = 24;

/// Segment command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Carries (a fragment of) application data.
    Push = 81,
    /// Acknowledges one sequence number and echoes its send timestamp.
    Ack = 82,
    /// Asks the peer to report its receive window.
    WindowProbe = 83,
    /// Reports the local receive window in response to a probe.
    WindowTell = 84,
}

impl Command {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            81 => Some(Self::Push),
            82 => Some(Self::Ack),
            83 => Some(Self::WindowProbe),
            84 => Some(Self::WindowTell),
            _ => None,
        }
    }
}

/// Decoded segment header.
///
/// `cmd` is kept raw so that segments with unknown commands can still be
/// skipped by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub cmd: u8,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub len: u32,
}

impl SegmentHeader {
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.cmd)
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Reads a header from the front of `buf`, advancing it.
    fn decode(buf: &mut &[u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        Self {
            conv: buf.get_u32_le(),
            cmd: buf.get_u8(),
            frg: buf.get_u8(),
            wnd: buf.get_u16_le(),
            ts: buf.get_u32_le(),
            sn: buf.get_u32_le(),
            una: buf.get_u32_le(),
            len: buf.get_u32_le(),
        }
    }
}

/// An owned segment as stored in the send and receive buffers.
#[derive(Debug, Clone)]
pub struct Segment {
    pub conv: u32,
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    pub payload: BytesMut,
}

impl Segment {
    pub fn header(&self) -> SegmentHeader {
        SegmentHeader {
            conv: self.conv,
            cmd: self.cmd as u8,
            frg: self.frg,
            wnd: self.wnd,
            ts: self.ts,
            sn: self.sn,
            una: self.una,
            len: self.payload.len() as u32,
        }
    }

    /// Number of bytes this segment occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        self.header().encode(buf);
        buf.put_slice(&self.payload);
    }
}

/// Returns the conversation id of the first segment in `packet` without
/// decoding the rest, so a dispatcher can route the datagram to its engine.
pub fn peek_conversation_id(packet: &[u8]) -> Option<u32> {
    let mut head = packet.get(..4)?;
    Some(head.get_u32_le())
}

/// Iterator over the segments packed into one datagram.
///
/// Yields the header and a borrowed payload for every well-formed segment.
/// A truncated header or a payload length that overruns the datagram yields
/// one [`InputError::Truncated`] and ends the iteration.
pub struct Segments<'a> {
    rest: &'a [u8],
    failed: bool,
}

impl<'a> Segments<'a> {
    pub fn new(packet: &'a [u8]) -> Self {
        Self {
            rest: packet,
            failed: false,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Result<(SegmentHeader, &'a [u8]), InputError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        if self.rest.len() < HEADER_SIZE {
            self.failed = true;
            return Some(Err(InputError::Truncated {
                len: self.rest.len(),
            }));
        }
        let mut cursor = self.rest;
        let header = SegmentHeader::decode(&mut cursor);
        let len = header.len as usize;
        if cursor.len() < len {
            self.failed = true;
            return Some(Err(InputError::Truncated {
                len: self.rest.len(),
            }));
        }
        let (payload, rest) = cursor.split_at(len);
        self.rest = rest;
        Some(Ok((header, payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn push(sn: u32, payload: &[u8]) -> Segment {
        Segment {
            conv: 0x1122_3344,
            cmd: Command::Push,
            frg: 2,
            wnd: 128,
            ts: 1000,
            sn,
            una: 7,
            payload: BytesMut::from(payload),
        }
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let mut buf = BytesMut::new();
        push(0x0102_0304, b"hi").encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE + 2);
        assert_eq!(&buf[..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(buf[4], 81);
        assert_eq!(buf[5], 2);
        assert_eq!(&buf[6..8], &[128, 0]);
        assert_eq!(&buf[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&buf[20..24], &[2, 0, 0, 0]);
        assert_eq!(&buf[24..], b"hi");
    }

    #[test]
    fn test_multiple_segments_in_one_packet() {
        let mut buf = BytesMut::new();
        push(1, b"first").encode(&mut buf);
        push(2, b"").encode(&mut buf);
        push(3, b"third").encode(&mut buf);

        let decoded: Vec<_> = Segments::new(&buf)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].0.sn, 1);
        assert_eq!(decoded[0].1, b"first");
        assert!(decoded[1].1.is_empty());
        assert_eq!(decoded[2].1, b"third");
    }

    #[test]
    fn test_truncated_header_is_rejected() {
        let mut buf = BytesMut::new();
        push(1, b"abc").encode(&mut buf);
        let mut it = Segments::new(&buf[..HEADER_SIZE - 1]);
        assert!(matches!(
            it.next(),
            Some(Err(InputError::Truncated { len: 23 }))
        ));
        assert!(it.next().is_none());
    }

    #[test]
    fn test_overlong_payload_length_is_rejected() {
        let mut buf = BytesMut::new();
        push(1, b"abc").encode(&mut buf);
        push(2, b"defg").encode(&mut buf);
        let cut = buf.len() - 1;
        let results: Vec<_> = Segments::new(&buf[..cut]).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn test_unknown_command_is_preserved_raw() {
        let mut buf = BytesMut::new();
        let mut header = push(1, b"x").header();
        header.cmd = 99;
        header.encode(&mut buf);
        buf.put_u8(b'x');
        let (decoded, payload) = Segments::new(&buf).next().unwrap().unwrap();
        assert_eq!(decoded.cmd, 99);
        assert_eq!(decoded.command(), None);
        assert_eq!(payload, b"x");
    }

    #[test]
    fn test_peek_conversation_id() {
        let mut buf = BytesMut::new();
        push(1, b"").encode(&mut buf);
        assert_eq!(peek_conversation_id(&buf), Some(0x1122_3344));
        assert_eq!(peek_conversation_id(&buf[..3]), None);
    }

    proptest! {
        #[test]
        fn arbitrary_bytes_never_panic(data in proptest::collection::vec(any::<u8>(), 0..200)) {
            for item in Segments::new(&data) {
                if let Ok((header, payload)) = item {
                    prop_assert_eq!(header.len as usize, payload.len());
                }
            }
        }
    }
}
