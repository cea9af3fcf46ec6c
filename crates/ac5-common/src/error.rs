//! Error types for each protocol layer.
//!
//! Mirrors the teacher's pattern of per-layer `thiserror` enums composed
//! under `anyhow` at the binary edge.

use thiserror::Error;

/// Common result alias used at module boundaries below the binary edge.
pub type Result<T> = std::result::Result<T, Ac5Error>;

#[derive(Debug, Error)]
pub enum Ac5Error {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Fsdp(#[from] FsdpError),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("RSA operation failed: {0}")]
    Rsa(String),

    #[error("AES-CWC authentication tag mismatch")]
    TagMismatch,

    #[error("ciphertext shorter than the authentication tag")]
    Truncated,

    #[error("no cipher key installed")]
    KeyNotInstalled,
}

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("SVFW packet length {0} is shorter than the 12-byte header")]
    PacketTooShort(u16),

    #[error("SVFW packet declares payload_length {declared} but length prefix implies {actual}")]
    PayloadLengthMismatch { declared: u32, actual: u32 },

    #[error("SVFW payload_length ({0}) and payload_length_short ({1}) disagree")]
    ShortLengthMismatch(u32, u16),

    #[error("message header too short: {0} bytes")]
    MessageTooShort(usize),

    #[error("unknown SVFW message type {0}")]
    UnknownMessageType(u32),
}

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("ticket buffer truncated at offset {0}")]
    Truncated(usize),

    #[error("unexpected top-level ticket blob type 0x{0:04x}")]
    UnknownBlobType(u16),

    #[error("unknown TLV field type 0x{0:04x}")]
    UnknownTlvType(u16),

    #[error("ticket is missing required field {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error)]
pub enum FsdpError {
    #[error("packet shorter than the 8-byte FSDP header")]
    HeaderTooShort,

    #[error("bad FSDP magic 0x{0:04x}")]
    BadMagic(u16),

    #[error("unknown FSDP opcode 0x{0:02x}")]
    UnknownOpcode(u8),
}
