//! FSDP reliable-datagram layer (§4.8): an RFC-793-flavored handshake/ack
//! state machine over UDP, with 12-bit modular sequence numbers packed two
//! to three bytes.

use std::time::{Duration, Instant};

use crate::error::FsdpError;

pub const SEQ_MODULUS: u16 = 4096;
const SEQ_MASK: u16 = 0x0FFF;

/// Default retransmit timeout; heartbeats fire at the same cadence when a
/// session has nothing else queued; `Closing` sessions wait 2x this before
/// becoming `Closed`.
pub const RTO: Duration = Duration::from_millis(500);
pub const HEARTBEAT_INTERVAL: Duration = RTO;
pub const CLOSE_GRACE: Duration = Duration::from_millis(1000);

/// Captured here because the header's magic is transmitted low-byte-first
/// (`0xF5, 0x02`) even though the rest of the wire format in this system is
/// big-endian — the one documented exception, and exactly the leading byte
/// the prologue-stripping check in §4.8 relies on to recognize a bare FSDP
/// packet.
pub const MAGIC_BYTES: [u8; 2] = [0xF5, 0x02];

fn seq_add1(seq: u16) -> u16 {
    (seq + 1) & SEQ_MASK
}

/// Modular "does `b` come after `a`" test over the 12-bit sequence space,
/// using the usual half-window convention.
pub fn seq_advanced(a: u16, b: u16) -> bool {
    let diff = (b.wrapping_sub(a)) & SEQ_MASK;
    diff != 0 && diff < SEQ_MODULUS / 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Syn,
    Rack,
    Dat,
    Hbt,
    Fin,
    Rst,
    PtDatFrag,
    Ack,
    SynAck,
    DatAck,
    FinAck,
    PtDatFragAck,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Result<Self, FsdpError> {
        Ok(match value {
            0x02 => Self::Syn,
            0x03 => Self::Rack,
            0x04 => Self::Dat,
            0x05 => Self::Hbt,
            0x06 => Self::Fin,
            0x07 => Self::Rst,
            0x08 => Self::PtDatFrag,
            0x31 => Self::Ack,
            0x32 => Self::SynAck,
            0x34 => Self::DatAck,
            0x36 => Self::FinAck,
            0x38 => Self::PtDatFragAck,
            other => return Err(FsdpError::UnknownOpcode(other)),
        })
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Self::Syn => 0x02,
            Self::Rack => 0x03,
            Self::Dat => 0x04,
            Self::Hbt => 0x05,
            Self::Fin => 0x06,
            Self::Rst => 0x07,
            Self::PtDatFrag => 0x08,
            Self::Ack => 0x31,
            Self::SynAck => 0x32,
            Self::DatAck => 0x34,
            Self::FinAck => 0x36,
            Self::PtDatFragAck => 0x38,
        }
    }

    /// Sequenced opcodes advance `local_seq` when sent. `SynAck` is handled
    /// separately: it bumps `local_seq` at handle time despite not being
    /// "sequenced" by this definition — a documented quirk, not a bug.
    pub fn is_sequenced(self) -> bool {
        matches!(self, Self::Dat | Self::DatAck | Self::FinAck)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsdpHeader {
    pub local_ack: u16,
    pub remote_ack: u16,
    pub opcode: Opcode,
}

impl FsdpHeader {
    pub const SIZE: usize = 8;

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = MAGIC_BYTES[0];
        out[1] = MAGIC_BYTES[1];
        out[2] = (self.local_ack & 0x00FF) as u8;
        out[3] = (((self.local_ack >> 8) as u8) << 4) | ((self.remote_ack >> 8) as u8 & 0x0F);
        out[4] = (self.remote_ack & 0x00FF) as u8;
        out[5] = self.opcode.as_u8();
        // out[6..8] reserved, left zero.
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FsdpError> {
        if bytes.len() < Self::SIZE {
            return Err(FsdpError::HeaderTooShort);
        }
        if bytes[0] != MAGIC_BYTES[0] || bytes[1] != MAGIC_BYTES[1] {
            return Err(FsdpError::BadMagic(u16::from_be_bytes([bytes[0], bytes[1]])));
        }
        let ack_byte1 = bytes[2];
        let ack_byte2 = bytes[3];
        let ack_byte3 = bytes[4];
        let local_ack = (((ack_byte2 >> 4) as u16) << 8) | ack_byte1 as u16;
        let remote_ack = (((ack_byte2 & 0x0F) as u16) << 8) | ack_byte3 as u16;
        let opcode = Opcode::from_u8(bytes[5])?;
        Ok(Self {
            local_ack,
            remote_ack,
            opcode,
        })
    }
}

/// True iff `datagram` is the very first one from a peer and carries the
/// 35-byte `playername(17) + unk(1) + playername(17)` prologue ahead of the
/// first FSDP header.
pub fn has_prologue(datagram: &[u8]) -> bool {
    match datagram.first() {
        Some(&b) => b != MAGIC_BYTES[0] && b != 0x25,
        None => false,
    }
}

pub const PROLOGUE_LEN: usize = 35;

/// Splits the 35-byte prologue off the first datagram, if present, reading
/// each 17-byte slot as a NUL-padded player name.
pub fn strip_prologue(datagram: &[u8]) -> (Option<(String, String)>, &[u8]) {
    if has_prologue(datagram) && datagram.len() >= PROLOGUE_LEN {
        let first = read_fixed_cstring(&datagram[0..17]);
        let second = read_fixed_cstring(&datagram[18..35]);
        (Some((first, second)), &datagram[PROLOGUE_LEN..])
    } else {
        (None, datagram)
    }
}

fn read_fixed_cstring(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Listening,
    Connecting,
    SynReceived,
    Established,
    Closing,
    Closed,
}

/// Per-peer FSDP state record (§3). Owned by the game-session task; never
/// shared across peers.
#[derive(Debug)]
pub struct FsdpSession {
    pub state: PeerState,
    pub local_seq: u16,
    pub local_seq_acked: u16,
    pub remote_seq: u16,
    pub remote_seq_acked: u16,
    pub last_peer_local_ack: u16,
    pub last_peer_remote_ack: u16,
    pub last_ack_send_time: Instant,
    pub close_time: Option<Instant>,
}

impl FsdpSession {
    pub fn new() -> Self {
        Self {
            state: PeerState::Listening,
            local_seq: 0,
            local_seq_acked: 0,
            remote_seq: 0,
            remote_seq_acked: 0,
            last_peer_local_ack: 0,
            last_peer_remote_ack: 0,
            last_ack_send_time: Instant::now(),
            close_time: None,
        }
    }

    fn header(&self, opcode: Opcode, local_ack: u16, remote_ack: u16) -> FsdpHeader {
        FsdpHeader {
            local_ack,
            remote_ack,
            opcode,
        }
    }

    /// Processes one inbound header and returns the headers (if any) to
    /// send in reply. Mutates `self` in place.
    pub fn handle(&mut self, incoming: &FsdpHeader) -> Result<Vec<FsdpHeader>, FsdpError> {
        match incoming.opcode {
            Opcode::Syn => {
                self.remote_seq = incoming.local_ack;
                self.local_seq = seq_add1(self.local_seq);
                self.state = PeerState::SynReceived;
                Ok(vec![
                    self.header(Opcode::SynAck, self.local_seq, incoming.local_ack),
                    self.header(Opcode::Ack, self.local_seq, incoming.local_ack),
                ])
            }
            Opcode::SynAck => {
                self.remote_seq = incoming.local_ack;
                self.local_seq = seq_add1(self.local_seq);
                self.state = PeerState::Established;
                Ok(vec![self.header(Opcode::Ack, self.local_seq, incoming.local_ack)])
            }
            Opcode::Ack => {
                if seq_advanced(self.last_peer_remote_ack, incoming.remote_ack) {
                    self.last_peer_remote_ack = incoming.remote_ack;
                    self.local_seq_acked = incoming.remote_ack;
                }
                Ok(vec![])
            }
            Opcode::Dat => {
                self.remote_seq = incoming.local_ack;
                Ok(vec![self.header(Opcode::DatAck, self.local_seq, incoming.local_ack)])
            }
            Opcode::DatAck => {
                self.remote_seq = incoming.local_ack;
                if seq_advanced(self.last_peer_remote_ack, incoming.remote_ack) {
                    self.last_peer_remote_ack = incoming.remote_ack;
                    self.local_seq_acked = incoming.remote_ack;
                }
                Ok(vec![self.header(Opcode::Ack, self.local_seq, incoming.local_ack)])
            }
            Opcode::Hbt => {
                self.last_ack_send_time = Instant::now();
                Ok(vec![])
            }
            Opcode::Fin => {
                self.state = PeerState::Closing;
                self.close_time = Some(Instant::now());
                Ok(vec![self.header(Opcode::FinAck, self.local_seq, incoming.local_ack)])
            }
            Opcode::FinAck => {
                self.state = PeerState::Closing;
                self.close_time = Some(Instant::now());
                Ok(vec![])
            }
            Opcode::Rst => {
                *self = Self::new();
                Ok(vec![])
            }
            Opcode::Rack | Opcode::PtDatFrag | Opcode::PtDatFragAck => {
                // Recognized but not part of the state transitions this
                // server drives; acknowledged with a no-op ACK.
                Ok(vec![self.header(Opcode::Ack, self.local_seq, incoming.local_ack)])
            }
        }
    }

    /// Marks a sequenced send (`Dat`, `DatAck`, `FinAck`) as transmitted,
    /// advancing `local_seq`. Call before the datagram actually goes out so
    /// the next `handle` call sees the bumped value.
    pub fn note_sequenced_send(&mut self, opcode: Opcode) {
        if opcode.is_sequenced() {
            self.local_seq = seq_add1(self.local_seq);
        }
    }

    pub fn needs_retransmit(&self, now: Instant) -> bool {
        seq_advanced(self.local_seq_acked, self.local_seq)
            && now.duration_since(self.last_ack_send_time) >= RTO
    }

    pub fn needs_heartbeat(&self, now: Instant) -> bool {
        self.state == PeerState::Established
            && now.duration_since(self.last_ack_send_time) >= HEARTBEAT_INTERVAL
    }

    pub fn closed_by_grace_period(&self, now: Instant) -> bool {
        matches!(self.state, PeerState::Closing)
            && self
                .close_time
                .map(|t| now.duration_since(t) >= CLOSE_GRACE)
                .unwrap_or(false)
    }
}

impl Default for FsdpSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_packed_ack_nibbles() {
        let header = FsdpHeader {
            local_ack: 0x123,
            remote_ack: 0xABC,
            opcode: Opcode::Dat,
        };
        let bytes = header.to_bytes();
        let parsed = FsdpHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = FsdpHeader {
            local_ack: 0,
            remote_ack: 0,
            opcode: Opcode::Syn,
        }
        .to_bytes();
        bytes[0] = 0x00;
        assert!(matches!(FsdpHeader::from_bytes(&bytes), Err(FsdpError::BadMagic(_))));
    }

    #[test]
    fn syn_bumps_local_seq_and_replies_with_syn_ack_and_ack() {
        let mut session = FsdpSession::new();
        let syn = FsdpHeader {
            local_ack: 0x123,
            remote_ack: 0,
            opcode: Opcode::Syn,
        };
        let replies = session.handle(&syn).unwrap();
        assert_eq!(session.local_seq, 1);
        assert_eq!(session.state, PeerState::SynReceived);
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].opcode, Opcode::SynAck);
        assert_eq!(replies[0].remote_ack, 0x123);
        assert_eq!(replies[1].opcode, Opcode::Ack);
        assert_eq!(replies[1].remote_ack, 0x123);
    }

    #[test]
    fn syn_ack_also_bumps_local_seq_despite_not_being_sequenced() {
        assert!(!Opcode::SynAck.is_sequenced());
        let mut session = FsdpSession::new();
        let syn_ack = FsdpHeader {
            local_ack: 5,
            remote_ack: 0,
            opcode: Opcode::SynAck,
        };
        session.handle(&syn_ack).unwrap();
        assert_eq!(session.local_seq, 1);
        assert_eq!(session.state, PeerState::Established);
    }

    #[test]
    fn fin_moves_state_to_closing_and_replies_fin_ack() {
        let mut session = FsdpSession::new();
        session.state = PeerState::Established;
        let fin = FsdpHeader {
            local_ack: 9,
            remote_ack: 9,
            opcode: Opcode::Fin,
        };
        let replies = session.handle(&fin).unwrap();
        assert_eq!(session.state, PeerState::Closing);
        assert!(session.close_time.is_some());
        assert_eq!(replies[0].opcode, Opcode::FinAck);
    }

    #[test]
    fn rst_fully_resets_the_session_record() {
        let mut session = FsdpSession::new();
        session.local_seq = 42;
        session.state = PeerState::Established;
        session
            .handle(&FsdpHeader {
                local_ack: 0,
                remote_ack: 0,
                opcode: Opcode::Rst,
            })
            .unwrap();
        assert_eq!(session.local_seq, 0);
        assert_eq!(session.state, PeerState::Listening);
    }

    #[test]
    fn sequence_advance_test_handles_wraparound() {
        assert!(seq_advanced(4094, 2));
        assert!(!seq_advanced(2, 4094));
        assert!(!seq_advanced(10, 10));
    }

    #[test]
    fn prologue_is_stripped_only_from_a_leading_non_magic_byte() {
        let mut datagram = vec![0u8; 35 + 4];
        datagram[0..5].copy_from_slice(b"alice");
        datagram[35..].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let (names, rest) = strip_prologue(&datagram);
        assert_eq!(names.unwrap().0, "alice");
        assert_eq!(rest, &[0xAA, 0xBB, 0xCC, 0xDD]);

        let raw = FsdpHeader {
            local_ack: 1,
            remote_ack: 2,
            opcode: Opcode::Hbt,
        }
        .to_bytes();
        let (names2, rest2) = strip_prologue(&raw);
        assert!(names2.is_none());
        assert_eq!(rest2, &raw);
    }
}
