//! beacond: LAN peer discovery over UDP beacons.
//!
//! An [`Engine`] announces this process to the local network and keeps a
//! registry of other engines sharing its application id. The transport is
//! pluggable: [`UdpTransport`] for real networks, [`MemoryBus`] for
//! in-process use.

pub mod engine;
pub mod transport;

pub use engine::{Engine, EngineError, EngineState};
pub use transport::{MemoryBus, MemoryTransport, Transport, UdpTransport};
