//! Byte-stream client (§4.2): a thin wrapper over `TcpStream` that enforces
//! an idle timeout and turns peer-close/timeout into a single disconnect
//! signal instead of a raw I/O error.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

/// Why a [`ByteStreamClient`] read loop stopped.
#[derive(Debug)]
pub enum StreamEvent {
    Received(Vec<u8>),
    IdleTimeout,
    PeerClosed,
}

pub struct ByteStreamReader {
    read_half: OwnedReadHalf,
    idle_timeout: Duration,
}

pub struct ByteStreamWriter {
    write_half: OwnedWriteHalf,
}

impl ByteStreamReader {
    /// Reads into an internal 4 KiB scratch buffer and returns the bytes
    /// read, `IdleTimeout`, or `PeerClosed`. No buffering beyond the single
    /// in-flight read: framing above this layer owns reassembly.
    pub async fn receive(&mut self) -> std::io::Result<StreamEvent> {
        let mut scratch = [0u8; 4096];
        match tokio::time::timeout(self.idle_timeout, self.read_half.read(&mut scratch)).await {
            Ok(Ok(0)) => Ok(StreamEvent::PeerClosed),
            Ok(Ok(n)) => Ok(StreamEvent::Received(scratch[..n].to_vec())),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(StreamEvent::IdleTimeout),
        }
    }
}

impl ByteStreamWriter {
    pub async fn send(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.write_half.write_all(bytes).await?;
        self.write_half.flush().await
    }
}

/// Splits a connected socket into an independently owned reader/writer pair
/// so the receive task and send task (§5) can each own one half.
pub fn split(stream: TcpStream, idle_timeout: Duration) -> (ByteStreamReader, ByteStreamWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        ByteStreamReader {
            read_half,
            idle_timeout,
        },
        ByteStreamWriter { write_half },
    )
}
