//! SVFW message framer (§4.4): message headers, the `Reply` sub-header, and
//! per-direction cipher application sitting on top of the packet framer.

use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BufMut, BytesMut};

use super::svfw_packet::{HEADER_SIZE, PacketFramer};
use crate::cipher::{Cipher, NullCipher};
use crate::error::{Ac5Error, FramingError};

const MESSAGE_HEADER_SIZE: usize = 12;
const REPLY_SUBHEADER_SIZE: usize = 16;
const REPLY_SUBHEADER: [u32; 4] = [0, 1, 0, 0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Reply,
    KeyMaterial,
    GetServiceStatus,
    Ticket,
    RequestQueryLoginServerInfo,
    RequestHandshake,
}

impl MessageType {
    pub fn from_u32(value: u32) -> Result<Self, FramingError> {
        Ok(match value {
            0 => Self::Reply,
            1 => Self::KeyMaterial,
            2 => Self::GetServiceStatus,
            3 => Self::Ticket,
            5 => Self::RequestQueryLoginServerInfo,
            6 => Self::RequestHandshake,
            other => return Err(FramingError::UnknownMessageType(other)),
        })
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Reply => 0,
            Self::KeyMaterial => 1,
            Self::GetServiceStatus => 2,
            Self::Ticket => 3,
            Self::RequestQueryLoginServerInfo => 5,
            Self::RequestHandshake => 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub message_index: u32,
    pub payload: Vec<u8>,
}

fn decode_message(mut body: &[u8]) -> Result<(MessageType, u32, &[u8]), Ac5Error> {
    if body.len() < MESSAGE_HEADER_SIZE {
        return Err(FramingError::MessageTooShort(body.len()).into());
    }
    let _header_size = body.get_u32();
    let message_type = MessageType::from_u32(body.get_u32())?;
    let message_index = body.get_u32();

    if message_type == MessageType::Reply {
        if body.len() < REPLY_SUBHEADER_SIZE {
            return Err(FramingError::MessageTooShort(body.len()).into());
        }
        body.advance(REPLY_SUBHEADER_SIZE);
    }

    Ok((message_type, message_index, body))
}

fn encode_message_header(out: &mut BytesMut, message_type: MessageType, message_index: u32, is_reply: bool) {
    out.put_u32(MESSAGE_HEADER_SIZE as u32);
    out.put_u32(message_type.as_u32());
    out.put_u32(message_index);
    if is_reply {
        for word in REPLY_SUBHEADER {
            out.put_u32(word);
        }
    }
}

/// Per-connection message framer: an encrypt cipher, a decrypt cipher, and
/// a `cipher_enabled` flag that the handshake toggles for exactly one
/// outbound frame. The flag is snapshotted once per `encode`/`decode` call
/// so a concurrent toggle never splits a single frame between states.
pub struct MessageFramer {
    packets: PacketFramer,
    encrypt: RwLock<Box<dyn Cipher>>,
    decrypt: RwLock<Box<dyn Cipher>>,
    cipher_enabled: AtomicBool,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self {
            packets: PacketFramer::new(),
            encrypt: RwLock::new(Box::new(NullCipher)),
            decrypt: RwLock::new(Box::new(NullCipher)),
            cipher_enabled: AtomicBool::new(true),
        }
    }

    /// Installs a fresh cipher pair for both directions, as step 1 of the
    /// auth handshake does.
    pub fn install_cipher(&self, encrypt: Box<dyn Cipher>, decrypt: Box<dyn Cipher>) {
        *self.encrypt.write().unwrap() = encrypt;
        *self.decrypt.write().unwrap() = decrypt;
    }

    pub fn set_cipher_enabled(&self, enabled: bool) {
        self.cipher_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn decode(&self, packet_payload: &[u8]) -> Result<Message, Ac5Error> {
        let (message_type, message_index, ciphertext) = decode_message(packet_payload)?;
        let enabled = self.cipher_enabled.load(Ordering::SeqCst);
        let payload = if enabled {
            self.decrypt.read().unwrap().decrypt(ciphertext)?
        } else {
            ciphertext.to_vec()
        };
        Ok(Message {
            message_type,
            message_index,
            payload,
        })
    }

    /// Encrypts (if enabled) and frames `plaintext` as an outbound message,
    /// returning the full length-prefixed packet bytes ready for the wire.
    pub fn encode(
        &self,
        message_type: MessageType,
        message_index: u32,
        is_reply: bool,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Ac5Error> {
        let enabled = self.cipher_enabled.load(Ordering::SeqCst);
        let payload = if enabled {
            self.encrypt.read().unwrap().encrypt(plaintext)?
        } else {
            plaintext.to_vec()
        };

        let reply_extra = if is_reply { REPLY_SUBHEADER_SIZE } else { 0 };
        let mut body = BytesMut::with_capacity(HEADER_SIZE + reply_extra + payload.len());
        encode_message_header(&mut body, message_type, message_index, is_reply);
        body.extend_from_slice(&payload);

        Ok(self.packets.encode(&body))
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::AesCwc128;

    #[test]
    fn plain_message_round_trips_with_cipher_disabled() {
        let framer = MessageFramer::new();
        framer.set_cipher_enabled(false);

        let packet_bytes = framer
            .encode(MessageType::RequestHandshake, 7, false, b"hello")
            .unwrap();
        let packet = crate::net::svfw_packet::Packet::decode_body(&packet_bytes[2..]).unwrap();
        let message = framer.decode(&packet.payload).unwrap();

        assert_eq!(message.message_type, MessageType::RequestHandshake);
        assert_eq!(message.message_index, 7);
        assert_eq!(message.payload, b"hello");
    }

    #[test]
    fn reply_messages_carry_the_fixed_subheader() {
        let framer = MessageFramer::new();
        framer.set_cipher_enabled(false);

        let packet_bytes = framer.encode(MessageType::Reply, 3, true, b"reply-body").unwrap();
        let packet = crate::net::svfw_packet::Packet::decode_body(&packet_bytes[2..]).unwrap();
        let message = framer.decode(&packet.payload).unwrap();

        assert_eq!(message.message_type, MessageType::Reply);
        assert_eq!(message.payload, b"reply-body");
    }

    #[test]
    fn cipher_swap_is_observed_by_the_next_call_immediately() {
        let framer = MessageFramer::new();
        framer.install_cipher(
            Box::new(AesCwc128::new([0x5A; 16])),
            Box::new(AesCwc128::new([0x5A; 16])),
        );

        let encrypted = framer
            .encode(MessageType::KeyMaterial, 1, false, b"0123456789ABCDEF")
            .unwrap();
        let packet = crate::net::svfw_packet::Packet::decode_body(&encrypted[2..]).unwrap();
        // Ciphertext in the wire payload must not equal the plaintext.
        assert_ne!(&packet.payload[MESSAGE_HEADER_SIZE..], b"0123456789ABCDEF");

        let decoded = framer.decode(&packet.payload).unwrap();
        assert_eq!(decoded.payload, b"0123456789ABCDEF");
    }
}
