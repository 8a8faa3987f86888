//! Configuration system for Beacon.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BEACON_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/beacon/config.toml
//!   3. ~/.config/beacon/config.toml

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::peer::SameAddressMode;
use crate::wire::{WireVersion, MAX_PACKET};

/// UDP port used by the daemon when none is configured.
pub const DEFAULT_PORT: u16 = 12021;

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    /// Payload announced to peers. Interpreted as UTF-8 by the daemon only.
    pub user_data: String,
    pub engine: EngineConfig,
}

/// Parameters fixed for the lifetime of one engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// UDP port for all beacon traffic.
    pub port: u16,
    /// Only beacons carrying this id are considered.
    pub application_id: u32,
    /// Receive poll granularity, also the idle sleep when not discovering.
    pub receive_timeout_ms: u64,
    /// Announce cadence.
    pub send_interval_ms: u64,
    /// Peers silent for longer than this are evicted.
    pub peer_ttl_ms: u64,
    pub can_discover: bool,
    pub can_be_discovered: bool,
    /// Keep entries for our own beacons.
    pub discover_self: bool,
    pub same_address_mode: SameAddressMode,
    /// Layout used for outgoing beacons. Incoming beacons of any layout are accepted.
    pub wire_version: WireVersion,
    /// Pad outgoing beacons up to this many bytes. 0 = no padding.
    pub min_packet_size: usize,
    pub transport: TransportMode,
}

/// Where beacons are sent and which groups are joined for receiving.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportMode {
    /// Limited broadcast, 255.255.255.255.
    #[default]
    Broadcast,
    /// An IPv4 multicast group.
    Multicast { group: Ipv4Addr },
    /// Broadcast and a multicast group.
    Both { group: Ipv4Addr },
}

impl TransportMode {
    pub fn broadcast(self) -> bool {
        matches!(self, TransportMode::Broadcast | TransportMode::Both { .. })
    }

    pub fn multicast_group(self) -> Option<Ipv4Addr> {
        match self {
            TransportMode::Broadcast => None,
            TransportMode::Multicast { group } | TransportMode::Both { group } => Some(group),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            user_data: String::new(),
            engine: EngineConfig {
                port: DEFAULT_PORT,
                can_discover: true,
                can_be_discovered: true,
                ..EngineConfig::default()
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 0,
            application_id: 0,
            receive_timeout_ms: 200,
            send_interval_ms: 5000,
            peer_ttl_ms: 10_000,
            can_discover: false,
            can_be_discovered: false,
            discover_self: false,
            same_address_mode: SameAddressMode::default(),
            wire_version: WireVersion::LATEST,
            min_packet_size: 0,
            transport: TransportMode::default(),
        }
    }
}

impl EngineConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_millis(self.peer_ttl_ms)
    }

    /// Check the parameters an engine cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.can_discover && !self.can_be_discovered {
            return Err(ConfigError::NoRole);
        }
        if let Some(group) = self.transport.multicast_group() {
            if !group.is_multicast() {
                return Err(ConfigError::NotMulticast(group));
            }
        }
        if self.min_packet_size > MAX_PACKET {
            return Err(ConfigError::MinPacketSizeTooLarge(self.min_packet_size));
        }
        Ok(())
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("beacon")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("engine can neither discover nor be discovered")]
    NoRole,
    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),
    #[error("min_packet_size {0} exceeds the maximum datagram size")]
    MinPacketSizeTooLarge(usize),
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BeaconConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit path, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?
        } else {
            BeaconConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BEACON_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        write_default_to(&path)?;
        Ok(path)
    }

    /// Apply BEACON_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("BEACON_USER_DATA") {
            self.user_data = v;
        }
        if let Ok(v) = std::env::var("BEACON_ENGINE__PORT") {
            if let Ok(p) = v.parse() {
                self.engine.port = p;
            }
        }
        if let Ok(v) = std::env::var("BEACON_ENGINE__APPLICATION_ID") {
            if let Ok(id) = v.parse() {
                self.engine.application_id = id;
            }
        }
        if let Ok(v) = std::env::var("BEACON_ENGINE__CAN_DISCOVER") {
            self.engine.can_discover = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("BEACON_ENGINE__CAN_BE_DISCOVERED") {
            self.engine.can_be_discovered = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("BEACON_ENGINE__DISCOVER_SELF") {
            self.engine.discover_self = v == "true" || v == "1";
        }
    }
}

fn write_default_to(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
    }
    let text = toml::to_string_pretty(&BeaconConfig::default()).map_err(ConfigError::SerializeFailed)?;
    std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
}
