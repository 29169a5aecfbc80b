// tests/integration/fdb_sync_test.rs

//! FDB synchronization scenarios: learn propagation, migration debounce,
//! flush ACK round-trips, router MACs, and the full export on peer start.

use super::fixtures::{
    alloc_port_pair, connected_pair, spawn_node, wait_sync_done, wait_until, IPL_PORT, MASTER,
    SLAVE,
};
use mlagd::core::hal::mock::HalOp;
use mlagd::core::hal::FdbNotifyRecord;
use mlagd::core::types::{FdbEntryType, MacAddr, Role};
use std::time::Duration;

const VID: u16 = 10;
const PORT: u64 = 100;
const OTHER_PORT: u64 = 200;

fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0x50, last])
}

fn learn(last: u8, port: u64) -> FdbNotifyRecord {
    FdbNotifyRecord::Learn {
        vid: VID,
        mac: mac(last),
        port,
        entry_type: FdbEntryType::DynamicAgeable,
    }
}

async fn dual_homed_pair() -> (super::fixtures::TestNode, super::fixtures::TestNode) {
    let (master, slave) = connected_pair().await;
    master
        .orchestrator
        .ports_add(&[PORT, OTHER_PORT])
        .await
        .unwrap();
    slave
        .orchestrator
        .ports_add(&[PORT, OTHER_PORT])
        .await
        .unwrap();
    let ready = |node: &super::fixtures::TestNode| {
        node.orchestrator
            .state()
            .port_db
            .lookup(PORT)
            .map(|e| e.lock().peers_configured.len() == 2)
            .unwrap_or(false)
    };
    wait_until("ports dual-homed", || ready(&master) && ready(&slave)).await;
    (master, slave)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slave_learn_reaches_master_hardware() {
    let (master, slave) = dual_homed_pair().await;

    slave.hal.inject_notification(vec![learn(1, PORT)]).await;

    wait_until("master installs the remote learn", || {
        master.hal.fdb_entry(VID, mac(1)).is_some()
    })
    .await;
    let installed = master.hal.fdb_entry(VID, mac(1)).unwrap();
    assert_eq!(installed.port, PORT);
    // A remote-owned dynamic entry must not age on this chip.
    assert_eq!(installed.entry_type, FdbEntryType::DynamicNonAgeable);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_migration_debounced_then_accepted() {
    let (master, slave) = dual_homed_pair().await;

    // Peer B (slave) learns the MAC first.
    slave.hal.inject_notification(vec![learn(1, PORT)]).await;
    wait_until("initial learn installed", || {
        master.hal.fdb_entry(VID, mac(1)).is_some()
    })
    .await;

    // An immediate migration to another port bounces off the debounce.
    master
        .hal
        .inject_notification(vec![learn(1, OTHER_PORT)])
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(master.hal.fdb_entry(VID, mac(1)).unwrap().port, PORT);

    // Past the debounce window the migration is accepted and broadcast.
    tokio::time::sleep(Duration::from_millis(2_300)).await;
    master
        .hal
        .inject_notification(vec![learn(1, OTHER_PORT)])
        .await;

    wait_until("master hardware points at the new port", || {
        master
            .hal
            .fdb_entry(VID, mac(1))
            .is_some_and(|e| e.port == OTHER_PORT)
    })
    .await;
    // The master owns the entry now, so locally it ages normally.
    assert_eq!(
        master.hal.fdb_entry(VID, mac(1)).unwrap().entry_type,
        FdbEntryType::DynamicAgeable
    );
    wait_until("slave hardware follows the migration", || {
        slave
            .hal
            .fdb_entry(VID, mac(1))
            .is_some_and(|e| e.port == OTHER_PORT && e.entry_type == FdbEntryType::DynamicNonAgeable)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flush_executes_on_both_peers() {
    let (master, slave) = dual_homed_pair().await;

    slave.hal.inject_notification(vec![learn(1, PORT)]).await;
    wait_until("learn installed before flush", || {
        master.hal.fdb_entry(VID, mac(1)).is_some()
    })
    .await;

    // A hardware-originated flush on the slave translates to a peer
    // FlushStart; the master executes locally and fans out.
    slave
        .hal
        .inject_notification(vec![FdbNotifyRecord::FlushPortVid {
            port: PORT,
            vid: VID,
        }])
        .await;

    let flushed = |node: &super::fixtures::TestNode| {
        node.hal.ops().iter().any(|op| {
            matches!(op, HalOp::FdbFlush(filter)
                if filter.by_port && filter.by_vid
                    && filter.port == PORT as u32 && filter.vid == VID)
        })
    };
    wait_until("master executed the flush", || flushed(&master)).await;
    wait_until("slave executed the flush", || flushed(&slave)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_router_mac_synced_as_static() {
    let (master, slave) = dual_homed_pair().await;

    slave
        .orchestrator
        .router_mac_cfg(VID, mac(7), true)
        .await
        .unwrap();

    // On the master the router MAC lands as a static entry pointing at
    // the IPL, since the true port lives on the other chassis.
    wait_until("router mac installed on master", || {
        master.hal.fdb_entry(VID, mac(7)).is_some()
    })
    .await;
    let installed = master.hal.fdb_entry(VID, mac(7)).unwrap();
    assert_eq!(installed.entry_type, FdbEntryType::Static);
    assert_eq!(installed.port, IPL_PORT);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_export_on_peer_start() {
    let (control_port, mac_sync_port) = alloc_port_pair();
    let master = spawn_node(MASTER, control_port, mac_sync_port);
    master.orchestrator.role_change(Role::Master).await.unwrap();
    master.orchestrator.ports_add(&[PORT]).await.unwrap();
    wait_until("master port configured", || {
        master.orchestrator.state().port_db.exists(PORT)
    })
    .await;

    // Seed the master table before the slave ever connects.
    for i in 0..50u8 {
        master.hal.inject_notification(vec![learn(i, PORT)]).await;
    }
    master
        .orchestrator
        .router_mac_cfg(VID, mac(200), true)
        .await
        .unwrap();

    let mut slave = spawn_node(SLAVE, control_port, mac_sync_port);
    slave.orchestrator.role_change(Role::Slave).await.unwrap();
    slave.orchestrator.peer_start(MASTER).await.unwrap();
    wait_sync_done(&mut slave, MASTER).await;

    // One export carries the 50 dynamic learns plus the router MAC.
    wait_until("slave hardware holds the export", || {
        slave.hal.fdb_len() == 51
    })
    .await;
    assert_eq!(
        slave.hal.fdb_entry(VID, mac(200)).unwrap().entry_type,
        FdbEntryType::Static
    );
}
