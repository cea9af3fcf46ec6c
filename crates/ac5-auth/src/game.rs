//! UDP/FSDP game-session service (§4.7–4.8): recovers the player identity
//! from the first datagram's prologue, looks up the AES-CWC commitment key
//! the auth state machine left in the session registry, and drives each
//! peer's reliable-datagram state machine from a single poll loop.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use ac5_common::SessionRegistry;
use ac5_common::cipher::AesCwc128;
use ac5_common::net::fsdp::{self, FsdpHeader, FsdpSession, Opcode};
use ac5_common::net::udp::UdpChannel;
use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::interval;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const MAX_DATAGRAM: usize = 2048;

/// Holds only the most recent unacked sequenced sends, bounding memory per
/// peer regardless of how far behind the peer's acks fall.
const RETRANSMIT_QUEUE_CAP: usize = 4;

struct PeerEntry {
    player_name: Option<String>,
    fsdp: FsdpSession,
    /// Backing store for §4.8's "retransmit any sequenced packet whose
    /// `local_seq` has not yet been acked" — the last few sequenced
    /// (`Dat`/`DatAck`/`FinAck`) headers sent to this peer.
    unacked_sequenced: VecDeque<FsdpHeader>,
}

impl PeerEntry {
    fn new() -> Self {
        Self {
            player_name: None,
            fsdp: FsdpSession::new(),
            unacked_sequenced: VecDeque::new(),
        }
    }

    fn record_send(&mut self, header: FsdpHeader) {
        if header.opcode.is_sequenced() {
            if self.unacked_sequenced.len() == RETRANSMIT_QUEUE_CAP {
                self.unacked_sequenced.pop_front();
            }
            self.unacked_sequenced.push_back(header);
        }
    }
}

pub async fn run(socket: UdpSocket, registry: SessionRegistry) -> Result<()> {
    let channel = UdpChannel::new(socket);
    let mut peers: HashMap<SocketAddr, PeerEntry> = HashMap::new();
    let mut recv_buf = vec![0u8; MAX_DATAGRAM];
    let mut ticker = interval(POLL_INTERVAL);

    loop {
        tokio::select! {
            recv = channel.socket().recv_from(&mut recv_buf) => {
                let (len, peer) = recv?;
                let datagram = recv_buf[..len].to_vec();
                if let Err(e) = handle_datagram(&channel, &registry, &mut peers, peer, &datagram).await {
                    warn!(%peer, error = %e, "fsdp datagram handling failed");
                }
            }
            _ = ticker.tick() => {
                poll_peers(&channel, &mut peers).await;
            }
        }
    }
}

async fn handle_datagram(
    channel: &UdpChannel,
    registry: &SessionRegistry,
    peers: &mut HashMap<SocketAddr, PeerEntry>,
    peer: SocketAddr,
    datagram: &[u8],
) -> Result<()> {
    let plaintext = channel.received(peer, datagram)?;
    let (names, body) = fsdp::strip_prologue(&plaintext);

    if let Some((player_name, _unused)) = names {
        match registry.lookup(&player_name) {
            Some(key) => {
                channel.install_cipher(peer, Box::new(AesCwc128::new(key)), Box::new(AesCwc128::new(key)));
                info!(%peer, player_name, "game session identified and keyed");
            }
            None => warn!(%peer, player_name, "no auth commitment found for player; continuing unkeyed"),
        }
        peers.entry(peer).or_insert_with(PeerEntry::new).player_name = Some(player_name);
    }

    if body.is_empty() {
        return Ok(());
    }

    let header = FsdpHeader::from_bytes(body)?;
    let entry = peers.entry(peer).or_insert_with(PeerEntry::new);
    let replies = entry.fsdp.handle(&header)?;

    for reply in replies {
        entry.fsdp.note_sequenced_send(reply.opcode);
        entry.record_send(reply);
        channel.send(peer, &reply.to_bytes()).await?;
    }

    if entry.fsdp.closed_by_grace_period(Instant::now()) {
        close_peer(channel, registry, peers, peer).await;
    }

    Ok(())
}

async fn poll_peers(channel: &UdpChannel, peers: &mut HashMap<SocketAddr, PeerEntry>) {
    let now = Instant::now();
    let mut closing = Vec::new();

    for (&peer, entry) in peers.iter_mut() {
        if entry.fsdp.needs_retransmit(now) {
            if let Some(last) = entry.unacked_sequenced.back().copied() {
                if let Err(e) = channel.send(peer, &last.to_bytes()).await {
                    warn!(%peer, error = %e, "retransmit send failed");
                } else {
                    entry.fsdp.last_ack_send_time = now;
                }
            }
        }
        if entry.fsdp.needs_heartbeat(now) {
            let hbt = FsdpHeader {
                local_ack: entry.fsdp.local_seq,
                remote_ack: entry.fsdp.remote_seq,
                opcode: Opcode::Hbt,
            };
            if let Err(e) = channel.send(peer, &hbt.to_bytes()).await {
                warn!(%peer, error = %e, "heartbeat send failed");
            } else {
                entry.fsdp.last_ack_send_time = now;
            }
        }
        if entry.fsdp.closed_by_grace_period(now) {
            closing.push(peer);
        }
    }

    for peer in closing {
        peers.remove(&peer);
        channel.forget_peer(&peer);
    }
}

async fn close_peer(
    channel: &UdpChannel,
    registry: &SessionRegistry,
    peers: &mut HashMap<SocketAddr, PeerEntry>,
    peer: SocketAddr,
) {
    if let Some(entry) = peers.remove(&peer) {
        if let Some(name) = entry.player_name {
            registry.remove(&name);
        }
    }
    channel.forget_peer(&peer);
}
