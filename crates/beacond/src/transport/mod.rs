//! Transport capability: the engine's only way onto the network.
//!
//! A transport sends one datagram to every configured destination
//! (broadcast address, multicast group, or both) and receives one datagram
//! at a time with a bounded wait. The engine owns its transport
//! exclusively, so every method takes `&mut self`.

use std::future::Future;
use std::io;
use std::net::SocketAddrV4;
use std::time::Duration;

pub mod memory;
pub mod udp;

pub use memory::{MemoryBus, MemoryTransport};
pub use udp::UdpTransport;

pub trait Transport: Send + 'static {
    /// Deliver `datagram` to every destination this transport announces to.
    fn send(&mut self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait up to `timeout` for one datagram.
    ///
    /// Returns the number of bytes written into `buf` and the sender's
    /// address, or `None` if nothing arrived in time.
    fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> impl Future<Output = io::Result<Option<(usize, SocketAddrV4)>>> + Send;

    /// Release the underlying resources. Later sends fail.
    fn close(&mut self);
}
