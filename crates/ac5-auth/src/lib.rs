//! AC5 Auth server: runs the four-step authentication handshake over TCP
//! (§4.6) and the UDP/FSDP game session behind it (§4.7–4.8).

pub mod game;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ac5_common::SessionRegistry;
use ac5_common::cipher::RsaCipher;
use ac5_common::config::Config;
use ac5_common::net::svfw_message::MessageFramer;
use ac5_common::net::svfw_packet::PacketReader;
use ac5_common::net::tcp::{self, StreamEvent};
use anyhow::Result;
use rsa::RsaPrivateKey;
use tokio::net::UdpSocket;
use tokio::sync::{Notify, mpsc};
use tracing::{info, warn};

use session::{AuthSession, AuthState, StepOutcome};

pub async fn run(config: Config, private_key: RsaPrivateKey) -> Result<()> {
    let registry = SessionRegistry::new();
    let config = Arc::new(config);
    let private_key = Arc::new(private_key);

    let udp_addr = SocketAddr::from(([0, 0, 0, 0], config.game_port));
    let udp_socket = UdpSocket::bind(udp_addr).await?;
    info!(%udp_addr, "game session listening");
    let game_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = game::run(udp_socket, game_registry).await {
            warn!(error = %e, "game session service exited");
        }
    });

    let tcp_addr = SocketAddr::from(([0, 0, 0, 0], config.auth_port));
    let listener = tokio::net::TcpListener::bind(tcp_addr).await?;
    info!(%tcp_addr, "auth server listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let config = Arc::clone(&config);
        let private_key = Arc::clone(&private_key);
        let registry = registry.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_client(socket, peer, config, private_key, registry).await {
                warn!(%peer, error = %e, "auth session ended with an error");
            }
        });
    }
}

/// Three cooperative logical tasks share one client's state (§5): the
/// receive task here drives the state machine and queues outbound frames
/// onto a send FIFO, a dedicated send task drains that FIFO onto the
/// socket in order, and a liveness task enforces that the handshake
/// completes within the configured timeout even if individual reads keep
/// arriving (the per-read idle timeout inside `ByteStreamReader` alone
/// wouldn't catch a session stalled mid-handshake by a slow/buggy client).
async fn handle_client(
    socket: tokio::net::TcpStream,
    peer: SocketAddr,
    config: Arc<Config>,
    private_key: Arc<RsaPrivateKey>,
    registry: SessionRegistry,
) -> Result<()> {
    let timeout = Duration::from_secs(config.auth_client_timeout);
    let (mut reader, mut writer) = tcp::split(socket, timeout);

    let framer = Arc::new(MessageFramer::new());
    let rsa_cipher = RsaCipher::new((*private_key).clone());
    framer.install_cipher(Box::new(rsa_cipher.clone()), Box::new(rsa_cipher));

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.send(&frame).await.is_err() {
                break;
            }
        }
    });

    let completed = Arc::new(AtomicBool::new(false));
    let deadline = Arc::new(Notify::new());
    let liveness_task = {
        let completed = Arc::clone(&completed);
        let deadline = Arc::clone(&deadline);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !completed.load(Ordering::SeqCst) {
                deadline.notify_one();
            }
        })
    };

    let mut session = AuthSession::new(peer);
    let mut packets = PacketReader::new();

    loop {
        let event = tokio::select! {
            event = reader.receive() => event?,
            _ = deadline.notified() => {
                info!(%peer, "auth session did not complete within the configured timeout");
                break;
            }
        };

        match event {
            StreamEvent::PeerClosed | StreamEvent::IdleTimeout => {
                info!(%peer, "auth connection closed");
                break;
            }
            StreamEvent::Received(chunk) => {
                packets.feed(&chunk);
                if !drain_packets(&mut packets, &framer, &mut session, &config, &registry, &tx)? {
                    break;
                }
                if matches!(session.state, AuthState::Complete | AuthState::Disconnected) {
                    completed.store(true, Ordering::SeqCst);
                }
                if session.state == AuthState::Disconnected {
                    break;
                }
            }
        }
    }

    drop(tx);
    let _ = send_task.await;
    liveness_task.abort();
    Ok(())
}

/// Parses and applies every complete packet currently buffered. Returns
/// `false` if the connection should close (a reply failed to queue, or the
/// state machine asked to disconnect).
fn drain_packets(
    packets: &mut PacketReader,
    framer: &MessageFramer,
    session: &mut AuthSession,
    config: &Config,
    registry: &SessionRegistry,
    tx: &mpsc::UnboundedSender<Vec<u8>>,
) -> Result<bool> {
    while let Some(packet) = packets.try_parse_one()? {
        let message = framer.decode(&packet.payload)?;
        match session::handle_message(session, framer, message, config, registry)? {
            StepOutcome::Reply(bytes) => {
                if tx.send(bytes).is_err() {
                    return Ok(false);
                }
                if session.state == AuthState::Complete {
                    info!(peer = %session.peer_addr, "auth handshake completed");
                }
            }
            StepOutcome::Disconnect => return Ok(false),
        }
    }
    Ok(true)
}
