//! beacond: announce this host and log peers as they come and go.

use std::time::Duration;

use anyhow::Result;

use beacon_core::{same_peer_sets, BeaconConfig, DiscoveredPeer, SameAddressMode};
use beacond::Engine;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = BeaconConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = BeaconConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BeaconConfig::default()
    });

    let mode = config.engine.same_address_mode;
    let engine = Engine::start(config.engine, config.user_data.into_bytes())?;
    tracing::info!(peer_id = %engine.peer_id(), "beacond running, ctrl-c to stop");

    let mut known: Vec<DiscoveredPeer> = Vec::new();
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("shutting down");
                break;
            }
            _ = ticker.tick() => {
                let current = engine.list_discovered();
                if membership_changed(mode, &known, &current) {
                    log_peers(&current);
                    known = current;
                }
            }
        }
    }

    engine.stop(true).await;
    Ok(())
}

/// True when the address set differs or any peer's user data changed.
fn membership_changed(mode: SameAddressMode, before: &[DiscoveredPeer], after: &[DiscoveredPeer]) -> bool {
    if !same_peer_sets(mode, before, after) {
        return true;
    }
    after.iter().any(|p| {
        before
            .iter()
            .find(|q| mode.same(&p.address, &q.address))
            .map_or(true, |q| q.user_data != p.user_data)
    })
}

fn log_peers(peers: &[DiscoveredPeer]) {
    tracing::info!(count = peers.len(), "discovered peers changed");
    for peer in peers {
        tracing::info!(
            addr = %peer.address,
            index = peer.last_received_index,
            user_data = %String::from_utf8_lossy(&peer.user_data),
            "peer"
        );
    }
}
