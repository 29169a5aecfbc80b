// tests/integration/fixtures.rs

//! Shared fixtures: a two-node harness where node 0 is elected master and
//! node 1 joins as slave over loopback TCP.

use mlagd::config::{Config, PeerConfig};
use mlagd::core::events::SystemEvent;
use mlagd::core::hal::mock::RecordingHal;
use mlagd::core::orchestrator::Orchestrator;
use mlagd::core::types::Role;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Each pair of nodes consumes two loopback ports; tests in this binary
/// run in parallel, so the allocator is shared.
static NEXT_PORT: AtomicU16 = AtomicU16::new(42_400);

pub const MASTER: u8 = 0;
pub const SLAVE: u8 = 1;
pub const IPL_PORT: u64 = 4;

pub struct TestNode {
    pub id: u8,
    pub hal: Arc<RecordingHal>,
    pub orchestrator: Orchestrator,
    pub notifications: broadcast::Receiver<SystemEvent>,
}

fn node_config(peer_id: u8, control_port: u16, mac_sync_port: u16) -> Config {
    let mut config = Config::default();
    config.peer_id = peer_id;
    config.ipl_port = Some(IPL_PORT);
    config.peers = vec![
        PeerConfig {
            id: 0,
            addr: "127.0.0.1".to_string(),
        },
        PeerConfig {
            id: 1,
            addr: "127.0.0.1".to_string(),
        },
    ];
    config.control.port = control_port;
    config.control.reconnect_interval = Duration::from_millis(100);
    config.mac_sync.port = mac_sync_port;
    config.mac_sync.reconnect_interval = Duration::from_millis(100);
    // Wide enough that two immediate learns always debounce, short enough
    // that tests can outwait it.
    config.fdb.migration_debounce = Duration::from_secs(2);
    config.flush.ack_timeout = Duration::from_millis(500);
    config
}

pub fn spawn_node(peer_id: u8, control_port: u16, mac_sync_port: u16) -> TestNode {
    let hal = Arc::new(RecordingHal::new());
    let orchestrator =
        Orchestrator::start(node_config(peer_id, control_port, mac_sync_port), hal.clone())
            .expect("orchestrator start");
    let notifications = orchestrator.state().subscribe_notifications();
    TestNode {
        id: peer_id,
        hal,
        orchestrator,
        notifications,
    }
}

/// Reserves a (control, mac-sync) loopback port pair.
pub fn alloc_port_pair() -> (u16, u16) {
    let control_port = NEXT_PORT.fetch_add(2, Ordering::Relaxed);
    (control_port, control_port + 1)
}

/// Spins up an elected master and a synced slave. Returns once both sides
/// raised `PeerSyncDone`.
pub async fn connected_pair() -> (TestNode, TestNode) {
    let (control_port, mac_sync_port) = alloc_port_pair();

    let mut master = spawn_node(MASTER, control_port, mac_sync_port);
    let mut slave = spawn_node(SLAVE, control_port, mac_sync_port);

    master.orchestrator.role_change(Role::Master).await.unwrap();
    slave.orchestrator.role_change(Role::Slave).await.unwrap();
    slave.orchestrator.peer_start(MASTER).await.unwrap();

    wait_sync_done(&mut master, SLAVE).await;
    wait_sync_done(&mut slave, MASTER).await;
    (master, slave)
}

pub async fn wait_sync_done(node: &mut TestNode, peer: u8) {
    wait_notification(node, |event| {
        matches!(event, SystemEvent::PeerSyncDone { peer_id } if *peer_id == peer)
    })
    .await;
}

pub async fn wait_notification(node: &mut TestNode, pred: impl Fn(&SystemEvent) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .unwrap_or_else(|| panic!("node {}: notification never arrived", node.id));
        match tokio::time::timeout(remaining, node.notifications.recv()).await {
            Ok(Ok(event)) if pred(&event) => return,
            Ok(Ok(_)) => continue,
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(e)) => panic!("node {}: notification channel closed: {e}", node.id),
            Err(_) => panic!("node {}: timed out waiting for notification", node.id),
        }
    }
}

/// Polls `cond` until it holds or the timeout expires.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
