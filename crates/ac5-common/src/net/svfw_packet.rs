//! SVFW packet framer (§4.3): the outer length-prefixed layer on top of the
//! raw TCP byte stream. Mirrors the two-phase read/single-buffer decode
//! style of the teacher's `PacketFrame`, but big-endian throughout and with
//! the packet's own fixed-width header instead of a varint.

use std::sync::atomic::{AtomicU16, Ordering};

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Ac5Error, FramingError};

pub const HEADER_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHeader {
    pub send_counter: u16,
    pub payload_length: u32,
    pub payload_length_short: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Build the length-prefixed wire bytes for `payload` under the given
    /// `send_counter`. `payload_length` and `payload_length_short` are
    /// always set equal to `payload.len()`, matching the invariant in §8.
    pub fn encode(send_counter: u16, payload: &[u8]) -> Vec<u8> {
        let body_len = HEADER_SIZE + payload.len();
        let mut buf = BytesMut::with_capacity(2 + body_len);
        buf.put_u16(body_len as u16);
        buf.put_u16(send_counter);
        buf.put_u16(0); // reserved
        buf.put_u32(payload.len() as u32);
        buf.put_u16(0); // reserved
        buf.put_u16(payload.len() as u16);
        buf.extend_from_slice(payload);
        buf.to_vec()
    }

    /// Decode a packet from `body`, which is exactly the `L` bytes read
    /// during the body phase (the 2-byte length prefix has already been
    /// consumed by the caller).
    pub fn decode_body(mut body: &[u8]) -> Result<Self, FramingError> {
        if body.len() < HEADER_SIZE {
            return Err(FramingError::PacketTooShort(body.len() as u16));
        }

        let send_counter = body.get_u16();
        body.get_u16(); // reserved
        let payload_length = body.get_u32();
        body.get_u16(); // reserved
        let payload_length_short = body.get_u16();

        let actual = body.remaining() as u32;
        if payload_length != actual {
            return Err(FramingError::PayloadLengthMismatch {
                declared: payload_length,
                actual,
            });
        }
        if payload_length_short as u32 != actual {
            return Err(FramingError::ShortLengthMismatch(
                payload_length,
                payload_length_short,
            ));
        }

        Ok(Packet {
            header: PacketHeader {
                send_counter,
                payload_length,
                payload_length_short,
            },
            payload: body.to_vec(),
        })
    }
}

/// Tracks the ever-incrementing `send_counter` for one connection's
/// outbound packets. Decoding is stateless and lives on [`Packet`] directly.
#[derive(Debug, Default)]
pub struct PacketFramer {
    send_counter: AtomicU16,
}

impl PacketFramer {
    pub fn new() -> Self {
        Self {
            send_counter: AtomicU16::new(0),
        }
    }

    pub fn encode(&self, payload: &[u8]) -> Vec<u8> {
        let counter = self.send_counter.fetch_add(1, Ordering::SeqCst);
        Packet::encode(counter, payload)
    }
}

/// Incremental packet parser fed raw chunks from [`super::tcp::ByteStreamReader`].
/// Mirrors the accumulate-then-drain buffering the teacher uses for its own
/// packet framing: each `feed` appends to an internal buffer, and
/// `try_parse_one` pulls as many complete packets out of it as are
/// currently available.
#[derive(Debug, Default)]
pub struct PacketReader {
    buf: Vec<u8>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Parses and drains one packet if the buffer currently holds a
    /// complete prefix + body; returns `Ok(None)` if more bytes are needed.
    pub fn try_parse_one(&mut self) -> Result<Option<Packet>, Ac5Error> {
        if self.buf.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if len < HEADER_SIZE {
            return Err(FramingError::PacketTooShort(len as u16).into());
        }
        if self.buf.len() < 2 + len {
            return Ok(None);
        }
        let packet = Packet::decode_body(&self.buf[2..2 + len])?;
        self.buf.drain(..2 + len);
        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_sets_matching_length_fields() {
        let payload = vec![0xAA; 27];
        let bytes = Packet::encode(5, &payload);
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        assert_eq!(len, HEADER_SIZE + payload.len());

        let packet = Packet::decode_body(&bytes[2..]).unwrap();
        assert_eq!(packet.header.send_counter, 5);
        assert_eq!(packet.header.payload_length, 27);
        assert_eq!(packet.header.payload_length_short, 27);
        assert_eq!(packet.payload, payload);
    }

    #[test]
    fn decode_rejects_body_shorter_than_header() {
        let err = Packet::decode_body(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, FramingError::PacketTooShort(4)));
    }

    #[test]
    fn decode_rejects_payload_length_mismatch() {
        let mut bytes = Packet::encode(0, b"hello");
        // Corrupt the declared payload_length field (bytes[4..8] of the body,
        // which is bytes[6..10] once the 2-byte length prefix is included).
        bytes[6] = 0xFF;
        let err = Packet::decode_body(&bytes[2..]).unwrap_err();
        assert!(matches!(err, FramingError::PayloadLengthMismatch { .. }));
    }

    #[test]
    fn send_counter_increments_and_wraps_at_u16() {
        let framer = PacketFramer::new();
        for expected in 0..3u16 {
            let bytes = framer.encode(b"x");
            let packet = Packet::decode_body(&bytes[2..]).unwrap();
            assert_eq!(packet.header.send_counter, expected);
        }
    }

    #[test]
    fn packet_reader_handles_split_chunks_across_feeds() {
        let mut reader = PacketReader::new();
        let bytes = Packet::encode(1, b"split across reads");

        reader.feed(&bytes[..3]);
        assert!(reader.try_parse_one().unwrap().is_none());

        reader.feed(&bytes[3..]);
        let packet = reader.try_parse_one().unwrap().unwrap();
        assert_eq!(packet.payload, b"split across reads");
        assert!(reader.try_parse_one().unwrap().is_none());
    }

    #[test]
    fn packet_reader_drains_multiple_packets_fed_at_once() {
        let mut reader = PacketReader::new();
        let mut bytes = Packet::encode(0, b"first");
        bytes.extend(Packet::encode(1, b"second"));
        reader.feed(&bytes);

        let first = reader.try_parse_one().unwrap().unwrap();
        let second = reader.try_parse_one().unwrap().unwrap();
        assert_eq!(first.payload, b"first");
        assert_eq!(second.payload, b"second");
        assert!(reader.try_parse_one().unwrap().is_none());
    }
}
