// tests/integration/port_coordination_test.rs

//! Dual-homed port lifecycle: both peers configure the same MLAG port,
//! links come up, a single link fails over to the IPL.

use super::fixtures::{connected_pair, wait_until};
use mlagd::core::hal::mock::HalOp;
use mlagd::core::port::{LocalState, RemoteState};

const PORT: u64 = 100;

fn local_state(node: &super::fixtures::TestNode, port: u64) -> Option<LocalState> {
    node.orchestrator
        .state()
        .port_db
        .lookup(port)
        .map(|e| e.lock().local_fsm.state())
}

fn remote_state(node: &super::fixtures::TestNode, port: u64) -> Option<RemoteState> {
    node.orchestrator
        .state()
        .port_db
        .lookup(port)
        .map(|e| e.lock().remote_fsm.state())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dual_homed_port_reaches_remotes_up() {
    let (master, slave) = connected_pair().await;

    master.orchestrator.ports_add(&[PORT]).await.unwrap();
    slave.orchestrator.ports_add(&[PORT]).await.unwrap();

    // Both peers see the port as dual-homed.
    let dual_homed = |node: &super::fixtures::TestNode| {
        node.orchestrator
            .state()
            .port_db
            .lookup(PORT)
            .map(|e| e.lock().peers_configured.len() == 2)
            .unwrap_or(false)
    };
    wait_until("port dual-homed on both peers", || {
        dual_homed(&master) && dual_homed(&slave)
    })
    .await;

    // Both links come up.
    master.orchestrator.port_oper_change(PORT, true).await.unwrap();
    slave.orchestrator.port_oper_change(PORT, true).await.unwrap();

    wait_until("both nodes isolated", || {
        remote_state(&master, PORT) == Some(RemoteState::RemotesUp)
            && remote_state(&slave, PORT) == Some(RemoteState::RemotesUp)
    })
    .await;

    assert_eq!(local_state(&master, PORT), Some(LocalState::LocalUp));
    assert_eq!(local_state(&slave, PORT), Some(LocalState::LocalUp));

    // Isolation is asserted on both sides; on the master it is also the
    // last port-touching HAL operation.
    let isolated = |node: &super::fixtures::TestNode| {
        node.orchestrator
            .state()
            .port_db
            .lookup(PORT)
            .map(|e| e.lock().remote_fsm.is_isolated())
            .unwrap_or(false)
    };
    assert!(isolated(&master));
    assert!(isolated(&slave));
    assert_eq!(
        master.hal.last_port_op(PORT),
        Some(HalOp::IsolationSet { port: PORT })
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_link_fault_redirects_and_unisolates() {
    let (master, slave) = connected_pair().await;
    master.orchestrator.ports_add(&[PORT]).await.unwrap();
    slave.orchestrator.ports_add(&[PORT]).await.unwrap();
    master.orchestrator.port_oper_change(PORT, true).await.unwrap();
    slave.orchestrator.port_oper_change(PORT, true).await.unwrap();
    wait_until("dual-homed steady state", || {
        remote_state(&master, PORT) == Some(RemoteState::RemotesUp)
            && remote_state(&slave, PORT) == Some(RemoteState::RemotesUp)
    })
    .await;

    // The slave's link fails.
    slave.orchestrator.port_oper_change(PORT, false).await.unwrap();

    // Slave side: traffic redirects to the IPL.
    wait_until("slave enters local fault", || {
        local_state(&slave, PORT) == Some(LocalState::LocalFault)
    })
    .await;
    assert_eq!(
        slave.hal.last_port_op(PORT),
        Some(HalOp::RedirectSet { port: PORT })
    );

    // Master side: the port un-isolates so the IPL becomes a legal egress.
    wait_until("master enters remote fault", || {
        remote_state(&master, PORT) == Some(RemoteState::RemoteFault)
    })
    .await;
    assert_eq!(
        master.hal.last_port_op(PORT),
        Some(HalOp::IsolationClear { port: PORT })
    );

    // Recovery re-isolates.
    slave.orchestrator.port_oper_change(PORT, true).await.unwrap();
    wait_until("master re-isolates", || {
        remote_state(&master, PORT) == Some(RemoteState::RemotesUp)
    })
    .await;
    assert_eq!(local_state(&slave, PORT), Some(LocalState::LocalUp));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_split_brain_shuts_ports() {
    let (master, slave) = connected_pair().await;
    master.orchestrator.ports_add(&[PORT]).await.unwrap();
    slave.orchestrator.ports_add(&[PORT]).await.unwrap();
    master.orchestrator.port_oper_change(PORT, true).await.unwrap();
    slave.orchestrator.port_oper_change(PORT, true).await.unwrap();
    wait_until("steady state before split", || {
        local_state(&slave, PORT) == Some(LocalState::LocalUp)
    })
    .await;

    // The master disappears; the slave must assume split-brain and shut
    // its MLAG ports rather than risk a loop.
    let super::fixtures::TestNode { orchestrator, .. } = master;
    orchestrator.stop().await.unwrap();

    wait_until("slave admin-disables its ports", || {
        slave
            .orchestrator
            .state()
            .port_db
            .lookup(PORT)
            .map(|e| !e.lock().local_fsm.admin_up())
            .unwrap_or(false)
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_port_delete_completion_event() {
    let (master, _slave) = connected_pair().await;
    master.orchestrator.ports_add(&[PORT]).await.unwrap();
    wait_until("port row exists", || {
        master.orchestrator.state().port_db.exists(PORT)
    })
    .await;

    let mut master = master;
    master.orchestrator.ports_delete(&[PORT]).await.unwrap();
    super::fixtures::wait_notification(&mut master, |event| {
        matches!(
            event,
            mlagd::core::events::SystemEvent::PortDeleted {
                port_id: 100,
                success: true
            }
        )
    })
    .await;

    // No dangling rows once no peer has the port configured.
    wait_until("port row removed", || {
        !master.orchestrator.state().port_db.exists(PORT)
    })
    .await;
}
