//! UDP transport over IPv4 broadcast and/or multicast.
//!
//! Two sockets, as the roles require: a send socket with SO_BROADCAST (and
//! multicast loopback so peers on the same host see each other), and a
//! receive socket bound to the beacon port with SO_REUSEADDR so several
//! engines on one host can share the port. The receive socket joins the
//! multicast group when one is configured.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use beacon_core::{EngineConfig, TransportMode};

use super::Transport;

pub struct UdpTransport {
    sender: Option<UdpSocket>,
    receiver: Option<UdpSocket>,
    targets: Vec<SocketAddrV4>,
}

impl UdpTransport {
    /// Open the sockets `config` needs.
    ///
    /// Must be called from within a Tokio runtime. Sockets created before a
    /// failing step are closed before the error is returned.
    pub fn open(config: &EngineConfig) -> Result<Self> {
        let targets = targets(config.transport, config.port);

        let sender = if config.can_be_discovered {
            let socket = make_send_socket(config.transport.multicast_group().is_some())
                .context("failed to create beacon send socket")?;
            Some(UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?)
        } else {
            None
        };

        let receiver = if config.can_discover {
            let socket = make_receive_socket(config.port, config.transport.multicast_group())
                .context("failed to create beacon receive socket")?;
            Some(UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?)
        } else {
            None
        };

        tracing::info!(
            port = config.port,
            targets = ?targets,
            send = sender.is_some(),
            receive = receiver.is_some(),
            "udp transport open"
        );

        Ok(Self {
            sender,
            receiver,
            targets,
        })
    }

    /// Port the receive socket is bound to, if discovering.
    pub fn local_port(&self) -> Option<u16> {
        self.receiver
            .as_ref()
            .and_then(|s| s.local_addr().ok())
            .map(|a| a.port())
    }

    pub fn targets(&self) -> &[SocketAddrV4] {
        &self.targets
    }
}

impl Transport for UdpTransport {
    async fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
        let socket = self.sender.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "transport has no send socket")
        })?;

        // Try every target; report the first failure.
        let mut result = Ok(());
        for target in &self.targets {
            if let Err(e) = socket.send_to(datagram, SocketAddr::V4(*target)).await {
                tracing::debug!(error = %e, %target, "beacon send_to failed");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<(usize, SocketAddrV4)>> {
        let Some(socket) = self.receiver.as_ref() else {
            tokio::time::sleep(timeout).await;
            return Ok(None);
        };

        match tokio::time::timeout(timeout, socket.recv_from(buf)).await {
            Err(_elapsed) => Ok(None),
            Ok(Err(e)) => Err(e),
            Ok(Ok((len, SocketAddr::V4(from)))) => Ok(Some((len, from))),
            Ok(Ok((_, SocketAddr::V6(from)))) => {
                tracing::trace!(%from, "ignoring IPv6 datagram");
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.sender = None;
        self.receiver = None;
    }
}

/// Destinations for outgoing beacons.
fn targets(mode: TransportMode, port: u16) -> Vec<SocketAddrV4> {
    let mut targets = Vec::with_capacity(2);
    if mode.broadcast() {
        targets.push(SocketAddrV4::new(Ipv4Addr::BROADCAST, port));
    }
    if let Some(group) = mode.multicast_group() {
        targets.push(SocketAddrV4::new(group, port));
    }
    targets
}

/// Create a UDP socket suitable for sending IPv4 broadcast and multicast.
fn make_send_socket(multicast: bool) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_broadcast(true).context("SO_BROADCAST")?;
    if multicast {
        // TTL 1: do not route beyond the local network
        socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
        socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    }
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    Ok(socket.into())
}

/// Create a UDP socket bound to the beacon port, joined to `group` if given.
fn make_receive_socket(port: u16, group: Option<Ipv4Addr>) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true).context("SO_REUSEPORT")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&bind_addr.into()).context("bind()")?;

    if let Some(group) = group {
        socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)
            .context("IP_ADD_MEMBERSHIP")?;
    }

    Ok(socket.into())
}
