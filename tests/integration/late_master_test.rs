// tests/integration/late_master_test.rs

//! The slave side must survive a master that is not there yet: connect
//! attempts fail, the reconnect timer keeps retrying, and the full sync
//! ladder runs once the master finally appears.

use super::fixtures::{alloc_port_pair, spawn_node, wait_sync_done, wait_until, MASTER, SLAVE};
use mlagd::core::types::Role;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread")]
async fn test_slave_retries_until_master_appears() {
    let (control_port, mac_sync_port) = alloc_port_pair();

    // The slave starts first and spins on its reconnect timer.
    let mut slave = spawn_node(SLAVE, control_port, mac_sync_port);
    slave.orchestrator.role_change(Role::Slave).await.unwrap();
    slave.orchestrator.peer_start(MASTER).await.unwrap();
    slave.orchestrator.ports_add(&[100]).await.unwrap();

    // Give it a few failed attempts before the master shows up.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let master = spawn_node(MASTER, control_port, mac_sync_port);
    master.orchestrator.role_change(Role::Master).await.unwrap();

    wait_sync_done(&mut slave, MASTER).await;

    // The configuration announced in the sync snapshot reached the master.
    wait_until("master learned the slave's port", || {
        master
            .orchestrator
            .state()
            .port_db
            .lookup(100)
            .map(|e| e.lock().peers_configured.contains(SLAVE))
            .unwrap_or(false)
    })
    .await;
}
