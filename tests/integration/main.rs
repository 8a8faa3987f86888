//! Beacon integration test harness.
//!
//! Scenarios in `discovery` run several engines on one in-process
//! `MemoryBus` and need nothing from the host. Scenarios in `udp` use real
//! broadcast sockets and are ignored by default:
//!
//!   cargo test --test integration -- --ignored
//!
//! Each test owns the engines it starts and stops them before returning.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::{Duration, Instant};

use beacon_core::EngineConfig;
use beacond::Engine;

mod discovery;
mod udp;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const APP_ID: u32 = 0x00be_ac04;

/// How long any scenario waits for the network to settle.
pub const SETTLE: Duration = Duration::from_secs(3);

/// Address of the `n`th simulated host.
pub fn host(n: u8) -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(192, 168, 77, n), 12021)
}

/// Fast-cadence config for in-process scenarios.
pub fn fast_config(can_discover: bool, can_be_discovered: bool) -> EngineConfig {
    EngineConfig {
        application_id: APP_ID,
        receive_timeout_ms: 10,
        send_interval_ms: 40,
        peer_ttl_ms: 30_000,
        can_discover,
        can_be_discovered,
        ..EngineConfig::default()
    }
}

/// Poll `check` until it holds or `timeout` passes. Returns the last result.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// User data of every peer `engine` currently lists, as strings, in order.
pub fn listed(engine: &Engine) -> Vec<String> {
    engine
        .list_discovered()
        .iter()
        .map(|p| String::from_utf8_lossy(&p.user_data).into_owned())
        .collect()
}
