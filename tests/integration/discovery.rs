//! Multi-engine discovery scenarios on an in-process bus.

use std::net::SocketAddrV4;
use std::time::Duration;

use beacon_core::wire::{self, Packet, PacketType, WireVersion};
use beacon_core::{EngineConfig, PeerId, SameAddressMode};
use beacond::{Engine, EngineState, MemoryBus, Transport};

use crate::{fast_config, host, listed, wait_until, APP_ID, SETTLE};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn announcer_is_discovered_then_leaves() {
    let bus = MemoryBus::new();
    let announcer = Engine::start_with_transport(fast_config(false, true), "peer A", bus.attach(host(1))).unwrap();
    let discoverer = Engine::start_with_transport(fast_config(true, false), "", bus.attach(host(2))).unwrap();

    let seen = wait_until(SETTLE, || listed(&discoverer) == ["peer A"]).await;
    assert!(seen, "discoverer lists {:?}", listed(&discoverer));

    let peers = discoverer.list_discovered();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].address, host(1));

    announcer.stop(true).await;
    let gone = wait_until(SETTLE, || discoverer.list_discovered().is_empty()).await;
    assert!(gone, "peer still listed after stop: {:?}", listed(&discoverer));

    discoverer.stop(true).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_engine_sees_every_other() {
    let bus = MemoryBus::new();
    let engines: Vec<Engine> = (1..=3)
        .map(|n| {
            Engine::start_with_transport(fast_config(true, true), format!("node {n}"), bus.attach(host(n)))
                .unwrap()
        })
        .collect();

    let converged = wait_until(SETTLE, || engines.iter().all(|e| e.list_discovered().len() == 2)).await;
    assert!(converged);

    // Snapshots are ordered by address.
    assert_eq!(listed(&engines[0]), ["node 2", "node 3"]);
    assert_eq!(listed(&engines[1]), ["node 1", "node 3"]);
    assert_eq!(listed(&engines[2]), ["node 1", "node 2"]);

    for engine in engines {
        engine.stop(true).await;
    }
}

#[tokio::test]
async fn other_applications_are_invisible() {
    let bus = MemoryBus::new();
    let foreign = Engine::start_with_transport(
        EngineConfig {
            application_id: APP_ID + 1,
            ..fast_config(false, true)
        },
        "foreign",
        bus.attach(host(1)),
    )
    .unwrap();
    let ours = Engine::start_with_transport(fast_config(false, true), "ours", bus.attach(host(2))).unwrap();
    let discoverer = Engine::start_with_transport(fast_config(true, false), "", bus.attach(host(3))).unwrap();

    assert!(wait_until(SETTLE, || listed(&discoverer) == ["ours"]).await);
    // Give the foreign announcer several more intervals to show up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(listed(&discoverer), ["ours"]);

    foreign.stop(true).await;
    ours.stop(true).await;
    discoverer.stop(true).await;
}

#[tokio::test]
async fn ip_mode_merges_ports_of_one_host() {
    let bus = MemoryBus::new();
    let second_port = SocketAddrV4::new(*host(1).ip(), 40_000);
    let a = Engine::start_with_transport(fast_config(false, true), "a", bus.attach(host(1))).unwrap();
    let b = Engine::start_with_transport(fast_config(false, true), "b", bus.attach(second_port)).unwrap();

    let by_port = Engine::start_with_transport(fast_config(true, false), "", bus.attach(host(8))).unwrap();
    let by_ip = Engine::start_with_transport(
        EngineConfig {
            same_address_mode: SameAddressMode::Ip,
            ..fast_config(true, false)
        },
        "",
        bus.attach(host(9)),
    )
    .unwrap();

    assert!(wait_until(SETTLE, || by_port.list_discovered().len() == 2).await);
    assert!(wait_until(SETTLE, || by_ip.list_discovered().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(by_ip.list_discovered().len(), 1);

    for engine in [a, b, by_port, by_ip] {
        engine.stop(true).await;
    }
}

#[tokio::test]
async fn legacy_announcer_is_discovered() {
    let bus = MemoryBus::new();
    let legacy = Engine::start_with_transport(
        EngineConfig {
            wire_version: WireVersion::V0,
            ..fast_config(false, true)
        },
        "old",
        bus.attach(host(1)),
    )
    .unwrap();
    let current = Engine::start_with_transport(fast_config(false, true), "new", bus.attach(host(2))).unwrap();
    let discoverer = Engine::start_with_transport(fast_config(true, false), "", bus.attach(host(3))).unwrap();

    assert!(wait_until(SETTLE, || listed(&discoverer) == ["old", "new"]).await);

    legacy.stop(true).await;
    current.stop(true).await;
    discoverer.stop(true).await;
}

#[tokio::test]
async fn silent_peer_is_evicted() {
    let bus = MemoryBus::new();
    let mut crashed = bus.attach(host(1));
    let discoverer = Engine::start_with_transport(
        EngineConfig {
            peer_ttl_ms: 200,
            ..fast_config(true, false)
        },
        "",
        bus.attach(host(2)),
    )
    .unwrap();
    assert!(wait_until(SETTLE, || discoverer.state() == EngineState::Running).await);

    // One beacon and then nothing, as from a host that lost power.
    let beacon = Packet::new(PacketType::IAmHere, APP_ID, PeerId::new(0xdead), 0, "crashed");
    crashed
        .send(&wire::serialize(&beacon, WireVersion::LATEST).unwrap())
        .await
        .unwrap();

    assert!(wait_until(SETTLE, || listed(&discoverer) == ["crashed"]).await);
    assert!(wait_until(SETTLE, || discoverer.list_discovered().is_empty()).await);

    discoverer.stop(true).await;
}

#[tokio::test]
async fn dropped_engine_still_says_goodbye() {
    let bus = MemoryBus::new();
    let announcer = Engine::start_with_transport(fast_config(false, true), "peer A", bus.attach(host(1))).unwrap();
    let discoverer = Engine::start_with_transport(fast_config(true, false), "", bus.attach(host(2))).unwrap();

    assert!(wait_until(SETTLE, || listed(&discoverer) == ["peer A"]).await);
    drop(announcer);
    assert!(wait_until(SETTLE, || discoverer.list_discovered().is_empty()).await);

    discoverer.stop(true).await;
}
