//! AC5 Login Server
//!
//! Single-round redirector: a client connects, asks for the auth service's
//! address, and is told the configured auth port before the connection
//! closes. See §4.5.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ac5_common::cipher::RsaCipher;
use ac5_common::config::Config;
use ac5_common::net::svfw_message::{Message, MessageFramer, MessageType};
use ac5_common::net::svfw_packet::PacketReader;
use ac5_common::net::tcp::{self, StreamEvent};
use ac5_common::proto;
use anyhow::{Result, bail};
use rsa::RsaPrivateKey;
use tracing::{info, warn};

/// Field number this server expects `RequestQueryLoginServerInfo` to carry
/// the connecting player's id under, and the field it echoes the auth port
/// back as. The real `.proto` schema is an opaque external collaborator;
/// these numbers are this server's own convention for the minimal fields
/// it actually inspects.
const FIELD_PLAYER_ID: u32 = 1;
const FIELD_AUTH_PORT: u32 = 1;

pub async fn run(config: Config, private_key: RsaPrivateKey) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.login_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "login server listening");

    let timeout = Duration::from_secs(config.login_client_timeout);
    let auth_port = config.auth_port;
    let private_key = Arc::new(private_key);

    loop {
        let (socket, peer) = listener.accept().await?;
        let private_key = Arc::clone(&private_key);
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, peer, timeout, auth_port, private_key).await {
                warn!(%peer, error = %e, "login session ended with an error");
            }
        });
    }
}

/// §4.1/§4.5: the login round's one request is the "initial message" on this
/// connection, so it arrives RSA-enveloped rather than under AES-CWC — there
/// is no handshake step on this connection to install a symmetric key.
async fn handle_client(
    socket: tokio::net::TcpStream,
    peer: SocketAddr,
    timeout: Duration,
    auth_port: u16,
    private_key: Arc<RsaPrivateKey>,
) -> Result<()> {
    let (mut reader, mut writer) = tcp::split(socket, timeout);
    let framer = MessageFramer::new();
    let rsa_cipher = RsaCipher::new((*private_key).clone());
    framer.install_cipher(Box::new(rsa_cipher.clone()), Box::new(rsa_cipher));
    let mut packets = PacketReader::new();

    loop {
        match reader.receive().await? {
            StreamEvent::PeerClosed | StreamEvent::IdleTimeout => {
                info!(%peer, "login connection closed before completing the round");
                return Ok(());
            }
            StreamEvent::Received(chunk) => {
                packets.feed(&chunk);
                while let Some(packet) = packets.try_parse_one()? {
                    let message = framer.decode(&packet.payload)?;
                    if message.message_type != MessageType::RequestQueryLoginServerInfo {
                        bail!("unexpected message type in login round");
                    }

                    log_player_id(&peer, &message);

                    let reply_payload = encode_auth_port_reply(auth_port);
                    let reply = framer.encode(MessageType::Reply, message.message_index, true, &reply_payload)?;
                    writer.send(&reply).await?;

                    info!(%peer, auth_port, "redirected client to auth service");
                    return Ok(());
                }
            }
        }
    }
}

fn log_player_id(peer: &SocketAddr, message: &Message) {
    match proto::get_string_field(&message.payload, FIELD_PLAYER_ID) {
        Some(player_id) => info!(%peer, player_id, "login request"),
        None => warn!(%peer, "login request missing player_id"),
    }
}

fn encode_auth_port_reply(auth_port: u16) -> Vec<u8> {
    let mut out = Vec::new();
    proto::put_varint_field(&mut out, FIELD_AUTH_PORT, auth_port as u64);
    out
}
