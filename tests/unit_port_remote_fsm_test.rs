use mlagd::core::hal::mock::{HalOp, RecordingHal};
use mlagd::core::port::{PortRemoteFsm, RemoteState, RemoteView};
use mlagd::core::types::PeerSet;

const PORT: u64 = 100;
const LOCAL: u8 = 0;
const REMOTE: u8 = 1;

fn view(configured: u32, oper: u32) -> RemoteView {
    RemoteView::new(
        PeerSet::from_bits(configured),
        PeerSet::from_bits(oper),
        LOCAL,
    )
}

fn fsm_in_global_down() -> PortRemoteFsm {
    let mut fsm = PortRemoteFsm::new(PORT);
    fsm.port_add();
    assert_eq!(fsm.state(), RemoteState::GlobalDown);
    fsm
}

#[test]
fn test_enable_with_remotes_up_isolates() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b10), &hal).unwrap();

    assert_eq!(fsm.state(), RemoteState::RemotesUp);
    assert!(fsm.is_isolated());
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationSet { port: PORT }]);
}

#[test]
fn test_enable_with_remote_down_enters_fault() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b00), &hal).unwrap();

    assert_eq!(fsm.state(), RemoteState::RemoteFault);
    assert!(!fsm.is_isolated());
    // Never isolated, so nothing to clear.
    assert!(hal.take_ops().is_empty());
}

#[test]
fn test_remote_recovery_reasserts_isolation() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b00), &hal).unwrap();

    // The view predates the transition: remote oper bit still clear.
    fsm.peer_port_up(REMOTE, view(0b11, 0b00), &hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::RemotesUp);
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationSet { port: PORT }]);
}

#[test]
fn test_remote_fault_unisolates() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b10), &hal).unwrap();
    hal.take_ops();

    fsm.peer_port_down(&hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::RemoteFault);
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationClear { port: PORT }]);

    // Invariant: RemoteFault means the IPL is a legal egress.
    assert!(!fsm.is_isolated());
}

#[test]
fn test_peer_down_reevaluates() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b10), &hal).unwrap();
    hal.take_ops();

    // The only remote peer went away; its bits are already cleared, so
    // all_remotes_up no longer holds.
    fsm.peer_down(view(0b01, 0b00), &hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::RemoteFault);
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationClear { port: PORT }]);
}

#[test]
fn test_fault_exit_to_global_down_reisolates() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b00), &hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::RemoteFault);

    fsm.port_global_disable(&hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::GlobalDown);
    assert!(fsm.is_isolated());
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationSet { port: PORT }]);
}

#[test]
fn test_port_del_clears_isolation() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b10), &hal).unwrap();
    hal.take_ops();

    // All remotes deleted.
    fsm.port_del(view(0b01, 0b00), &hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::Idle);
    assert!(!fsm.is_isolated());
    assert_eq!(hal.take_ops(), vec![HalOp::IsolationClear { port: PORT }]);
}

#[test]
fn test_port_del_with_remaining_remote_stays() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(view(0b11, 0b10), &hal).unwrap();

    fsm.port_del(view(0b11, 0b10), &hal).unwrap();
    assert_eq!(fsm.state(), RemoteState::RemotesUp);
}
