//! beacon-core: shared types, wire format, and configuration.
//! All other Beacon crates depend on this one.

pub mod config;
pub mod peer;
pub mod wire;

pub use config::{BeaconConfig, ConfigError, EngineConfig, TransportMode};
pub use peer::{same_peer_sets, DiscoveredPeer, PeerId, SameAddressMode};
pub use wire::{Packet, PacketType, WireError, WireVersion};
