//! Discovery over real UDP broadcast.

use std::time::Duration;

use beacon_core::{ConfigError, EngineConfig};
use beacond::{Engine, EngineError};

use crate::{listed, wait_until, APP_ID};

fn udp_config(port: u16, can_discover: bool, can_be_discovered: bool) -> EngineConfig {
    EngineConfig {
        port,
        application_id: APP_ID,
        receive_timeout_ms: 20,
        send_interval_ms: 100,
        peer_ttl_ms: 5_000,
        can_discover,
        can_be_discovered,
        ..EngineConfig::default()
    }
}

/// A port unlikely to collide with concurrent runs on the same host.
fn test_port() -> u16 {
    40_000 + (std::process::id() % 20_000) as u16
}

#[tokio::test]
async fn start_without_roles_opens_nothing() {
    let err = Engine::start(udp_config(test_port(), false, false), "x").err();
    assert!(matches!(err, Some(EngineError::Config(ConfigError::NoRole))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[ignore = "needs a host that loops back IPv4 broadcast"]
async fn broadcast_discovery_end_to_end() {
    let port = test_port();
    let discoverer = Engine::start(udp_config(port, true, false), "").unwrap();
    let announcer = Engine::start(udp_config(port, false, true), "peer A").unwrap();

    let seen = wait_until(Duration::from_secs(5), || listed(&discoverer) == ["peer A"]).await;
    assert!(seen, "discoverer lists {:?}", listed(&discoverer));

    announcer.stop(true).await;
    assert!(wait_until(Duration::from_secs(5), || discoverer.list_discovered().is_empty()).await);
    discoverer.stop(true).await;
}
