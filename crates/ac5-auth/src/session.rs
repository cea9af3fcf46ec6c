//! Four-step authentication state machine (§4.6).

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use ac5_common::cipher::AesCwc128;
use ac5_common::net::svfw_message::{Message, MessageFramer, MessageType};
use ac5_common::proto;
use ac5_common::ticket::Ticket;
use ac5_common::{AppVersion, SessionRegistry};
use anyhow::{Result, anyhow, bail};
use bytes::{BufMut, BytesMut};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::warn;

/// These numbers are this server's own convention for the handful of
/// fields it reads out of the (opaque, externally generated) protobuf
/// messages — see DESIGN.md.
const FIELD_AES_CWC_KEY: u32 = 1;
const FIELD_REQ_PLAYER_NAME: u32 = 1;
const FIELD_REQ_APP_VERSION: u32 = 2;
const FIELD_RESP_ID: u32 = 1;
const FIELD_RESP_PLAYER_NAME: u32 = 2;
const FIELD_RESP_UNK3: u32 = 3;
const FIELD_RESP_APP_VERSION: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    WaitingForHandshakeRequest,
    WaitingForServiceStatusRequest,
    WaitingForKeyMaterial,
    WaitingForTicket,
    Complete,
    Disconnected,
}

pub struct AuthSession {
    pub peer_addr: SocketAddr,
    pub state: AuthState,
    game_cwc_key_commitment: Option<[u8; 16]>,
    pub player_name: Option<String>,
    pub app_version: Option<AppVersion>,
    /// Watermark for the replay guard: an inbound message whose index
    /// doesn't exceed this is rejected rather than processed.
    last_message_index: Option<u32>,
}

impl AuthSession {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            peer_addr,
            state: AuthState::WaitingForHandshakeRequest,
            game_cwc_key_commitment: None,
            player_name: None,
            app_version: None,
            last_message_index: None,
        }
    }
}

pub enum StepOutcome {
    Reply(Vec<u8>),
    Disconnect,
}

pub fn handle_message(
    session: &mut AuthSession,
    framer: &MessageFramer,
    message: Message,
    config: &ac5_common::config::Config,
    registry: &SessionRegistry,
) -> Result<StepOutcome> {
    if let Some(last) = session.last_message_index
        && message.message_index <= last
    {
        warn!(peer = %session.peer_addr, message_index = message.message_index, "message index did not advance; rejecting as a replay");
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }
    session.last_message_index = Some(message.message_index);

    match session.state {
        AuthState::WaitingForHandshakeRequest => handle_handshake(session, framer, message),
        AuthState::WaitingForServiceStatusRequest => handle_service_status(session, framer, message, config),
        AuthState::WaitingForKeyMaterial => handle_key_material(session, framer, message),
        AuthState::WaitingForTicket => handle_ticket(session, framer, message, config, registry),
        AuthState::Complete | AuthState::Disconnected => {
            warn!(peer = %session.peer_addr, "message received after the session already completed");
            session.state = AuthState::Disconnected;
            Ok(StepOutcome::Disconnect)
        }
    }
}

fn handle_handshake(session: &mut AuthSession, framer: &MessageFramer, message: Message) -> Result<StepOutcome> {
    if message.message_type != MessageType::RequestHandshake {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }

    let key_bytes = proto::get_bytes_field(&message.payload, FIELD_AES_CWC_KEY)
        .ok_or_else(|| anyhow!("handshake request missing aes_cwc_key field"))?;
    if key_bytes.len() != 16 {
        bail!("aes_cwc_key must be 16 bytes, got {}", key_bytes.len());
    }
    let mut key = [0u8; 16];
    key.copy_from_slice(key_bytes);

    framer.install_cipher(Box::new(AesCwc128::new(key)), Box::new(AesCwc128::new(key)));
    framer.set_cipher_enabled(false);

    let mut response = [0u8; 27];
    OsRng.fill_bytes(&mut response[0..11]);
    // response[11..27] stays zero.

    let packet = framer.encode(MessageType::RequestHandshake, message.message_index, false, &response)?;

    framer.set_cipher_enabled(true);
    session.state = AuthState::WaitingForServiceStatusRequest;
    Ok(StepOutcome::Reply(packet))
}

fn encode_service_status_response(id: u32, player_name: &str, unk3: bool, app_version: u64) -> Vec<u8> {
    let mut out = Vec::new();
    proto::put_varint_field(&mut out, FIELD_RESP_ID, id as u64);
    proto::put_string_field(&mut out, FIELD_RESP_PLAYER_NAME, player_name);
    proto::put_varint_field(&mut out, FIELD_RESP_UNK3, unk3 as u64);
    proto::put_varint_field(&mut out, FIELD_RESP_APP_VERSION, app_version);
    out
}

fn handle_service_status(
    session: &mut AuthSession,
    framer: &MessageFramer,
    message: Message,
    config: &ac5_common::config::Config,
) -> Result<StepOutcome> {
    if message.message_type != MessageType::GetServiceStatus {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }

    let player_name = proto::get_string_field(&message.payload, FIELD_REQ_PLAYER_NAME).unwrap_or_default();
    let app_version = AppVersion::from_u64(
        proto::get_varint_field(&message.payload, FIELD_REQ_APP_VERSION).unwrap_or(0),
    );

    let min_app_version = AppVersion::from_u64(config.min_app_version);
    let max_app_version = AppVersion::from_u64(config.max_app_version);
    if !app_version.in_range(min_app_version, max_app_version) {
        let response = encode_service_status_response(0, "", false, 0);
        let packet = framer.encode(MessageType::GetServiceStatus, message.message_index, false, &response)?;
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Reply(packet));
    }

    let response = encode_service_status_response(2, "", false, app_version.to_u64());
    let packet = framer.encode(MessageType::GetServiceStatus, message.message_index, false, &response)?;

    session.player_name = Some(player_name);
    session.app_version = Some(app_version);
    session.state = AuthState::WaitingForKeyMaterial;
    Ok(StepOutcome::Reply(packet))
}

fn handle_key_material(session: &mut AuthSession, framer: &MessageFramer, message: Message) -> Result<StepOutcome> {
    if message.message_type != MessageType::KeyMaterial {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }
    if message.payload.len() != 16 {
        bail!("key material payload must be 16 bytes, got {}", message.payload.len());
    }

    let mut buf = [0u8; 16];
    OsRng.fill_bytes(&mut buf);
    buf[0..8].copy_from_slice(&message.payload[8..16]);

    // Committed before encoding: the cipher here returns a freshly
    // allocated ciphertext rather than mutating `buf` in place, so the
    // aliasing hazard the reference implementation has to guard against
    // cannot occur in this design — but the copy-first ordering is kept
    // anyway to match the documented invariant.
    session.game_cwc_key_commitment = Some(buf);

    let packet = framer.encode(MessageType::KeyMaterial, message.message_index, false, &buf)?;
    session.state = AuthState::WaitingForTicket;
    Ok(StepOutcome::Reply(packet))
}

fn handle_ticket(
    session: &mut AuthSession,
    framer: &MessageFramer,
    message: Message,
    config: &ac5_common::config::Config,
    registry: &SessionRegistry,
) -> Result<StepOutcome> {
    if message.message_type != MessageType::Ticket {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }

    let ticket = match Ticket::parse(&message.payload) {
        Ok(t) => t,
        Err(e) => {
            warn!(peer = %session.peer_addr, error = %e, "ticket parse failed");
            session.state = AuthState::Disconnected;
            return Ok(StepOutcome::Disconnect);
        }
    };

    let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    if ticket.is_expired(now_ms) {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }
    if !ticket.is_signed() {
        warn!(peer = %session.peer_addr, "ticket is unsigned");
    }

    let mut committed = session
        .game_cwc_key_commitment
        .take()
        .ok_or_else(|| anyhow!("ticket received before a key material commitment was recorded"))?;
    let cookie_key = ticket.cookie_session_key();
    let matches = cookie_key == Some(committed);
    committed.fill(0);

    if !matches {
        session.state = AuthState::Disconnected;
        return Ok(StepOutcome::Disconnect);
    }

    if let (Some(name), Some(key)) = (session.player_name.clone(), cookie_key) {
        registry.commit(name, key);
    }

    let address = choose_game_server_address(config, session.peer_addr);
    let response = build_connect_game_server_response(address, config.game_port);
    let packet = framer.encode(MessageType::Reply, message.message_index, true, &response)?;

    session.state = AuthState::Complete;
    Ok(StepOutcome::Reply(packet))
}

fn is_rfc1918(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168)
}

fn choose_game_server_address(config: &ac5_common::config::Config, peer: SocketAddr) -> Ipv4Addr {
    let private = match peer.ip() {
        IpAddr::V4(v4) => is_rfc1918(v4),
        IpAddr::V6(_) => false,
    };
    let hostname = if private {
        &config.private_hostname
    } else {
        &config.public_hostname
    };
    hostname.parse().unwrap_or(Ipv4Addr::LOCALHOST)
}

/// 56-byte `ConnectGameServerPortIdResponse` (§4.6 step 4, §9 open
/// question: the magic constants below are fixed, not parameterized).
fn build_connect_game_server_response(address: Ipv4Addr, game_port: u16) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(56);
    out.put_u64(0); // auth_token
    out.put_u32(u32::from(address));
    out.put_u16(game_port);
    out.put_u16(0); // padding
    for v in [
        0x8000u32, 0x8000, 0xA000, 0xA000, 0x80, 0x8000, 0xA000, 0x493E0, 0x61A8, 0xC,
    ] {
        out.put_u32(v);
    }
    out.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac5_common::cipher::{AesCwc128, Cipher};
    use ac5_common::net::svfw_packet::Packet;
    use ac5_common::ticket::{Signature, Ticket as TicketModel, UserData};

    fn decode_reply(framer: &MessageFramer, packet_bytes: &[u8]) -> Message {
        let packet = Packet::decode_body(&packet_bytes[2..]).unwrap();
        framer.decode(&packet.payload).unwrap()
    }

    #[test]
    fn handshake_builds_a_27_byte_response_with_trailing_zeros() {
        let framer = MessageFramer::new();
        framer.set_cipher_enabled(false);
        let mut session = AuthSession::new("127.0.0.1:1".parse().unwrap());

        let mut payload = Vec::new();
        proto::put_bytes_field(&mut payload, FIELD_AES_CWC_KEY, &[0u8; 16]);
        let message = Message {
            message_type: MessageType::RequestHandshake,
            message_index: 9,
            payload,
        };

        let outcome = handle_handshake(&mut session, &framer, message).unwrap();
        let StepOutcome::Reply(packet_bytes) = outcome else {
            panic!("expected a reply");
        };

        let packet = Packet::decode_body(&packet_bytes[2..]).unwrap();
        assert_eq!(packet.header.payload_length, 12 + 27);
        assert_eq!(session.state, AuthState::WaitingForServiceStatusRequest);

        let reply = framer.decode(&packet.payload).unwrap();
        assert_eq!(reply.message_index, 9);
        assert_eq!(reply.payload.len(), 27);
        assert!(reply.payload[11..27].iter().all(|&b| b == 0));
    }

    #[test]
    fn service_status_out_of_range_replies_empty_and_disconnects() {
        let framer = MessageFramer::new();
        framer.install_cipher(Box::new(AesCwc128::new([1; 16])), Box::new(AesCwc128::new([1; 16])));
        let mut session = AuthSession::new("127.0.0.1:1".parse().unwrap());
        session.state = AuthState::WaitingForServiceStatusRequest;

        let mut config = ac5_common::config::Config::default();
        config.min_app_version = 0x5644000001000002;
        config.max_app_version = 0x5644000001000002;

        let mut payload = Vec::new();
        proto::put_string_field(&mut payload, FIELD_REQ_PLAYER_NAME, "pilot");
        proto::put_varint_field(&mut payload, FIELD_REQ_APP_VERSION, 0x5644000001000001);
        let message = Message {
            message_type: MessageType::GetServiceStatus,
            message_index: 1,
            payload,
        };

        let outcome = handle_service_status(&mut session, &framer, message, &config).unwrap();
        let StepOutcome::Reply(packet_bytes) = outcome else {
            panic!("expected a reply");
        };
        let reply = decode_reply(&framer, &packet_bytes);
        assert_eq!(proto::get_varint_field(&reply.payload, FIELD_RESP_ID), Some(0));
        assert_eq!(session.state, AuthState::Disconnected);
    }

    #[test]
    fn key_material_commits_client_bytes_in_the_low_half() {
        let framer = MessageFramer::new();
        framer.install_cipher(Box::new(AesCwc128::new([2; 16])), Box::new(AesCwc128::new([2; 16])));
        let mut session = AuthSession::new("127.0.0.1:1".parse().unwrap());
        session.state = AuthState::WaitingForKeyMaterial;

        let mut payload = vec![0u8; 16];
        for (i, b) in payload[8..16].iter_mut().enumerate() {
            *b = i as u8;
        }
        let message = Message {
            message_type: MessageType::KeyMaterial,
            message_index: 2,
            payload,
        };

        let outcome = handle_key_material(&mut session, &framer, message).unwrap();
        let StepOutcome::Reply(packet_bytes) = outcome else {
            panic!("expected a reply");
        };
        let reply = decode_reply(&framer, &packet_bytes);
        assert_eq!(&reply.payload[0..8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(session.state, AuthState::WaitingForTicket);
        assert!(session.game_cwc_key_commitment.is_some());
    }

    #[test]
    fn expired_ticket_disconnects_without_a_reply() {
        let framer = MessageFramer::new();
        framer.install_cipher(Box::new(AesCwc128::new([3; 16])), Box::new(AesCwc128::new([3; 16])));
        let mut session = AuthSession::new("127.0.0.1:1".parse().unwrap());
        session.state = AuthState::WaitingForTicket;
        session.game_cwc_key_commitment = Some([9u8; 16]);
        session.player_name = Some("pilot".to_string());

        let ticket = TicketModel {
            version: 1,
            size: 0,
            userdata: UserData {
                serial: vec![],
                issuer_id: 0,
                issued_date: 0,
                expire_date: 1,
                user_id: 0,
                online_id: "pilot".to_string(),
                region: vec![],
                domain: String::new(),
                service_id: vec![],
                status: 0,
                cookie: Some(vec![9u8; 16]),
            },
            signature: Signature {
                signer: vec![1],
                signature: vec![1],
            },
        };
        let config = ac5_common::config::Config::default();
        let registry = SessionRegistry::new();

        let message = Message {
            message_type: MessageType::Ticket,
            message_index: 3,
            payload: ticket.to_bytes(),
        };
        let outcome = handle_ticket(&mut session, &framer, message, &config, &registry).unwrap();
        assert!(matches!(outcome, StepOutcome::Disconnect));
        assert_eq!(session.state, AuthState::Disconnected);
    }
}
