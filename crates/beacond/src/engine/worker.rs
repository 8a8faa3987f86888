//! Engine worker: the announce/receive loop.
//!
//! One worker per engine. Each iteration announces if the send interval has
//! elapsed, then either performs one bounded receive followed by an eviction
//! pass, or sleeps for the receive timeout when not discovering. Stop is
//! observed at the top of each iteration only.

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, watch};

use beacon_core::wire::{self, Packet, PacketType, MAX_PACKET};
use beacon_core::{EngineConfig, PeerId};
use beacon_services::{ApplyOutcome, Registry};

use super::EngineState;
use crate::transport::Transport;

pub(crate) struct Worker<T> {
    config: EngineConfig,
    transport: T,
    registry: Registry,
    peer_id: PeerId,
    next_index: u64,
    user_data: watch::Receiver<Bytes>,
    state: watch::Sender<EngineState>,
    shutdown: broadcast::Receiver<()>,
    buf: Vec<u8>,
}

impl<T: Transport> Worker<T> {
    pub(crate) fn new(
        config: EngineConfig,
        transport: T,
        registry: Registry,
        peer_id: PeerId,
        user_data: watch::Receiver<Bytes>,
        state: watch::Sender<EngineState>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            transport,
            registry,
            peer_id,
            next_index: 0,
            user_data,
            state,
            shutdown,
            buf: vec![0u8; MAX_PACKET],
        }
    }

    pub(crate) async fn run(mut self) {
        self.state.send_replace(EngineState::Running);
        let send_interval = self.config.send_interval();
        let mut last_announce: Option<Instant> = None;

        while !self.stop_requested() {
            if self.config.can_be_discovered
                && last_announce.map_or(true, |at| at.elapsed() >= send_interval)
            {
                self.announce(PacketType::IAmHere).await;
                last_announce = Some(Instant::now());
            }

            if self.config.can_discover {
                self.receive_once().await;
                let evicted = self.registry.evict_expired(Instant::now());
                if evicted > 0 {
                    tracing::debug!(evicted, "expired discovered peers");
                }
            } else {
                tokio::time::sleep(self.config.receive_timeout()).await;
            }
        }

        self.state.send_replace(EngineState::Stopping);
        if self.config.can_be_discovered {
            self.announce(PacketType::IAmOutOfHere).await;
        }
        self.transport.close();
        self.state.send_replace(EngineState::Stopped);
        tracing::info!(peer_id = %self.peer_id, "engine stopped");
    }

    /// A signal, a dropped engine, or a lagged channel all mean stop.
    fn stop_requested(&mut self) -> bool {
        !matches!(self.shutdown.try_recv(), Err(TryRecvError::Empty))
    }

    async fn announce(&mut self, packet_type: PacketType) {
        let user_data = self.user_data.borrow().clone();
        let index = self.next_index;
        self.next_index += 1;

        let version = self.config.wire_version;
        let packet = Packet::new(
            packet_type,
            self.config.application_id,
            self.peer_id,
            index,
            user_data,
        )
        .pad_to(version, self.config.min_packet_size);

        let bytes = match wire::serialize(&packet, version) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, ?packet_type, "beacon not encodable, skipped");
                return;
            }
        };

        match self.transport.send(&bytes).await {
            Ok(()) => tracing::trace!(?packet_type, index, bytes = bytes.len(), "beacon sent"),
            Err(e) => tracing::warn!(error = %e, ?packet_type, "beacon send failed"),
        }
    }

    async fn receive_once(&mut self) {
        let timeout = self.config.receive_timeout();
        let (len, from) = match self.transport.recv_timeout(&mut self.buf, timeout).await {
            Ok(Some(received)) => received,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "beacon receive failed");
                return;
            }
        };

        let (version, packet) = match wire::parse(&self.buf[..len]) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::trace!(error = %e, %from, "dropping malformed datagram");
                return;
            }
        };

        let now = Instant::now();
        match packet.packet_type {
            PacketType::IAmHere => {
                let index = packet.snapshot_index;
                let outcome = self.registry.apply_here(
                    from,
                    packet.application_id,
                    packet.peer_id,
                    index,
                    packet.user_data,
                    now,
                );
                match outcome {
                    ApplyOutcome::Inserted => {
                        tracing::info!(peer_id = %packet.peer_id, addr = %from, ?version, "peer discovered")
                    }
                    ApplyOutcome::Updated => {
                        tracing::debug!(peer_id = %packet.peer_id, addr = %from, index, "peer user data updated")
                    }
                    ApplyOutcome::Refreshed | ApplyOutcome::Ignored => {
                        tracing::trace!(peer_id = %packet.peer_id, addr = %from, ?outcome, "beacon applied")
                    }
                }
            }
            PacketType::IAmOutOfHere => {
                if self
                    .registry
                    .apply_gone(from, packet.application_id, packet.peer_id, now)
                {
                    tracing::info!(peer_id = %packet.peer_id, addr = %from, "peer left");
                }
            }
        }
    }
}
