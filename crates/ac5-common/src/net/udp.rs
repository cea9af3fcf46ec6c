//! UDP channel (§4.7): a per-peer datagram demuxer with switchable
//! encrypt/decrypt ciphers, mirroring the TCP message layer's contract but
//! over `UdpSocket`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::RwLock;

use tokio::net::UdpSocket;

use crate::cipher::{Cipher, NullCipher};
use crate::error::{Ac5Error, CipherError};

/// Per-peer cipher slot. New peers default to a no-op cipher until the
/// caller installs one (the game-session layer installs AES-CWC keyed by
/// the player's commitment key recovered from the prologue).
struct PeerChannel {
    encrypt: Box<dyn Cipher>,
    decrypt: Box<dyn Cipher>,
}

pub struct UdpChannel {
    socket: Arc<UdpSocket>,
    peers: RwLock<HashMap<SocketAddr, PeerChannel>>,
}

impl UdpChannel {
    pub fn new(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn install_cipher(&self, peer: SocketAddr, encrypt: Box<dyn Cipher>, decrypt: Box<dyn Cipher>) {
        self.peers
            .write()
            .unwrap()
            .insert(peer, PeerChannel { encrypt, decrypt });
    }

    pub fn forget_peer(&self, peer: &SocketAddr) {
        self.peers.write().unwrap().remove(peer);
    }

    /// Applies the peer's inbound cipher, if one is installed; otherwise
    /// passes the datagram through unchanged.
    pub fn received(&self, peer: SocketAddr, datagram: &[u8]) -> Result<Vec<u8>, Ac5Error> {
        let peers = self.peers.read().unwrap();
        match peers.get(&peer) {
            Some(channel) => Ok(channel.decrypt.decrypt(datagram)?),
            None => Ok(NullCipher.decrypt(datagram)?),
        }
    }

    pub async fn send(&self, peer: SocketAddr, payload: &[u8]) -> Result<(), Ac5Error> {
        let ciphertext = {
            let peers = self.peers.read().unwrap();
            match peers.get(&peer) {
                Some(channel) => channel.encrypt.encrypt(payload)?,
                None => NullCipher.encrypt(payload)?,
            }
        };
        self.socket
            .send_to(&ciphertext, peer)
            .await
            .map_err(|e| Ac5Error::Io(e))?;
        Ok(())
    }
}

impl From<CipherError> for Ac5Error {
    fn from(e: CipherError) -> Self {
        Ac5Error::Cipher(e)
    }
}
