//! In-process broadcast medium.
//!
//! Every transport attached to a `MemoryBus` receives every datagram sent on
//! it, its own included, tagged with the sender's attached address. This is
//! the semantics of a single LAN segment with broadcast loopback, without
//! sockets, which makes multi-engine scenarios deterministic.

use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::Transport;

/// Datagrams a slow receiver may fall behind by before it starts losing them.
const BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct Datagram {
    from: SocketAddrV4,
    payload: Bytes,
}

/// A shared medium. Cloning yields another handle to the same medium.
#[derive(Debug, Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<Datagram>,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    /// Attach a new endpoint that sends from `address`.
    pub fn attach(&self, address: SocketAddrV4) -> MemoryTransport {
        MemoryTransport {
            address,
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
            closed: false,
        }
    }
}

pub struct MemoryTransport {
    address: SocketAddrV4,
    tx: broadcast::Sender<Datagram>,
    rx: broadcast::Receiver<Datagram>,
    closed: bool,
}

impl MemoryTransport {
    pub fn address(&self) -> SocketAddrV4 {
        self.address
    }
}

impl Transport for MemoryTransport {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed"));
        }
        // No receivers is not an error on a broadcast medium.
        let _ = self.tx.send(Datagram {
            from: self.address,
            payload: Bytes::copy_from_slice(datagram),
        });
        Ok(())
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddrV4)>> {
        if self.closed {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_elapsed) => return Ok(None),
                Ok(Ok(datagram)) => {
                    // Oversized datagrams are truncated, as with a real socket.
                    let len = datagram.payload.len().min(buf.len());
                    buf[..len].copy_from_slice(&datagram.payload[..len]);
                    return Ok(Some((len, datagram.from)));
                }
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, address = %self.address, "memory transport lagged");
                }
                Ok(Err(RecvError::Closed)) => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
