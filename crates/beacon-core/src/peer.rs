//! Peer identity and address sameness.

use std::fmt;
use std::net::SocketAddrV4;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Process-local identity of one running engine.
///
/// Generated once at engine start and carried in every beacon so an engine
/// can recognise its own broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u32);

impl PeerId {
    pub const fn new(v: u32) -> Self {
        Self(v)
    }

    /// Draw a fresh random identity.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for PeerId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// When two source addresses refer to the same peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameAddressMode {
    /// Same IPv4 address, any port.
    Ip,
    /// Same IPv4 address and same UDP port.
    #[default]
    IpAndPort,
}

impl SameAddressMode {
    pub fn same(self, a: &SocketAddrV4, b: &SocketAddrV4) -> bool {
        match self {
            SameAddressMode::Ip => a.ip() == b.ip(),
            SameAddressMode::IpAndPort => a == b,
        }
    }

    /// Canonical lookup key: the port is dropped in `Ip` mode.
    pub fn key(self, addr: &SocketAddrV4) -> SocketAddrV4 {
        match self {
            SameAddressMode::Ip => SocketAddrV4::new(*addr.ip(), 0),
            SameAddressMode::IpAndPort => *addr,
        }
    }
}

/// A remote peer currently considered present.
///
/// Values handed out by the registry are copies; `user_data` is immutable
/// so later registry updates are never visible through them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Source address of the first beacon that created this entry.
    pub address: SocketAddrV4,
    pub user_data: Bytes,
    /// Snapshot index of the beacon that last set `user_data`.
    pub last_received_index: u64,
    /// When any beacon from this peer was last accepted.
    pub last_updated_at: Instant,
}

/// Whether two peer lists contain the same set of addresses under `mode`.
///
/// User data is not compared.
pub fn same_peer_sets(mode: SameAddressMode, lhs: &[DiscoveredPeer], rhs: &[DiscoveredPeer]) -> bool {
    let covered = |from: &[DiscoveredPeer], into: &[DiscoveredPeer]| {
        from.iter()
            .all(|p| into.iter().any(|q| mode.same(&p.address, &q.address)))
    };
    covered(lhs, rhs) && covered(rhs, lhs)
}
