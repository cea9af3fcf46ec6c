//! AC5 Common Library
//!
//! Shared functionality for the matchmaking/session-setup server emulator:
//! - Cipher abstraction (RSA handshake cipher, AES-CWC-128)
//! - SVFW packet and message framing
//! - FSDP reliable-datagram state machine
//! - Ticket TLV parsing
//! - Per-instance JSON configuration

pub mod appversion;
pub mod cipher;
pub mod config;
pub mod error;
pub mod keys;
pub mod net;
pub mod proto;
pub mod session_registry;
pub mod ticket;

pub use appversion::AppVersion;
pub use error::{Ac5Error, Result};
pub use session_registry::SessionRegistry;
