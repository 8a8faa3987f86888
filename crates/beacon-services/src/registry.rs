//! Discovery registry: tracks nearby peers and what they announce.
//!
//! The registry is written by the engine's receive path and eviction tick
//! and read by anyone holding a handle. Every operation takes the single
//! interior lock, so no caller ever sees a half-applied beacon, and reads
//! hand out owned copies rather than references into the table.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use beacon_core::{DiscoveredPeer, EngineConfig, PeerId, SameAddressMode};

/// Fixed acceptance and expiry rules for one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryPolicy {
    /// Beacons for any other application are ignored.
    pub application_id: u32,
    /// Identity of the owning engine.
    pub local_peer_id: PeerId,
    /// Accept beacons carrying `local_peer_id`.
    pub discover_self: bool,
    pub same_address_mode: SameAddressMode,
    /// Maximum silence before eviction.
    pub ttl: Duration,
}

impl RegistryPolicy {
    pub fn from_config(config: &EngineConfig, local_peer_id: PeerId) -> Self {
        Self {
            application_id: config.application_id,
            local_peer_id,
            discover_self: config.discover_self,
            same_address_mode: config.same_address_mode,
            ttl: config.peer_ttl(),
        }
    }

    fn accepts(&self, application_id: u32, peer_id: PeerId) -> bool {
        application_id == self.application_id
            && (self.discover_self || peer_id != self.local_peer_id)
    }
}

/// What `apply_here` did with a beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Wrong application, or our own beacon.
    Ignored,
    /// First beacon from this address.
    Inserted,
    /// Newer snapshot: user data replaced.
    Updated,
    /// Stale or duplicate snapshot: only liveness refreshed.
    Refreshed,
}

/// The peer registry, shared between the engine worker and its callers.
///
/// Keyed on the source address as canonicalised by the sameness mode.
#[derive(Debug, Clone)]
pub struct Registry {
    policy: RegistryPolicy,
    peers: Arc<Mutex<HashMap<SocketAddrV4, DiscoveredPeer>>>,
}

impl Registry {
    pub fn new(policy: RegistryPolicy) -> Self {
        Self {
            policy,
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn policy(&self) -> &RegistryPolicy {
        &self.policy
    }

    /// Apply an "I am here" beacon received from `address` at `now`.
    pub fn apply_here(
        &self,
        address: SocketAddrV4,
        application_id: u32,
        peer_id: PeerId,
        snapshot_index: u64,
        user_data: Bytes,
        now: Instant,
    ) -> ApplyOutcome {
        if !self.policy.accepts(application_id, peer_id) {
            return ApplyOutcome::Ignored;
        }

        let key = self.policy.same_address_mode.key(&address);
        let mut peers = self.lock();
        match peers.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(DiscoveredPeer {
                    address,
                    user_data,
                    last_received_index: snapshot_index,
                    last_updated_at: now,
                });
                ApplyOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.last_updated_at = now;
                if snapshot_index > entry.last_received_index {
                    entry.user_data = user_data;
                    entry.last_received_index = snapshot_index;
                    ApplyOutcome::Updated
                } else {
                    ApplyOutcome::Refreshed
                }
            }
        }
    }

    /// Apply an "I am out of here" beacon. Returns true if an entry was removed.
    pub fn apply_gone(
        &self,
        address: SocketAddrV4,
        application_id: u32,
        peer_id: PeerId,
        _now: Instant,
    ) -> bool {
        if !self.policy.accepts(application_id, peer_id) {
            return false;
        }
        let key = self.policy.same_address_mode.key(&address);
        self.lock().remove(&key).is_some()
    }

    /// Remove every entry silent for longer than the TTL. Returns how many went.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let ttl = self.policy.ttl;
        let mut peers = self.lock();
        let before = peers.len();
        peers.retain(|_, peer| now.saturating_duration_since(peer.last_updated_at) <= ttl);
        before - peers.len()
    }

    /// Copy of the current entries, ordered by address.
    pub fn snapshot(&self) -> Vec<DiscoveredPeer> {
        let mut peers: Vec<DiscoveredPeer> = self.lock().values().cloned().collect();
        peers.sort_by_key(|p| p.address);
        peers
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Poisoning is recovered: every mutation is a single insert, remove, or assignment.
    fn lock(&self) -> MutexGuard<'_, HashMap<SocketAddrV4, DiscoveredPeer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
