use mlagd::core::hal::mock::{HalOp, RecordingHal};
use mlagd::core::port::{LocalState, PortLocalFsm};

const PORT: u64 = 100;

fn fsm_in_global_down() -> PortLocalFsm {
    let mut fsm = PortLocalFsm::new(PORT);
    fsm.port_add();
    assert_eq!(fsm.state(), LocalState::GlobalDown);
    fsm
}

#[test]
fn test_idle_until_port_add() {
    let fsm = PortLocalFsm::new(PORT);
    assert_eq!(fsm.state(), LocalState::Idle);
    assert!(!fsm.admin_up());
}

#[test]
fn test_enable_with_link_down_enters_local_fault() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(&hal).unwrap();

    assert_eq!(fsm.state(), LocalState::LocalFault);
    assert!(fsm.admin_up());
    // Admin-enable, then the fault entry installs the IPL redirect.
    assert_eq!(
        hal.take_ops(),
        vec![
            HalOp::AdminSet { port: PORT, up: true },
            HalOp::RedirectSet { port: PORT },
        ]
    );
}

#[test]
fn test_enable_with_link_up_enters_local_up() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_up(&hal).unwrap();
    fsm.port_global_enable(&hal).unwrap();

    assert_eq!(fsm.state(), LocalState::LocalUp);
    assert_eq!(
        hal.take_ops(),
        vec![HalOp::AdminSet { port: PORT, up: true }]
    );
}

#[test]
fn test_link_recovery_clears_redirect() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(&hal).unwrap();
    hal.take_ops();

    fsm.port_up(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::LocalUp);
    assert_eq!(hal.take_ops(), vec![HalOp::RedirectClear { port: PORT }]);

    fsm.port_down(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::LocalFault);
    assert_eq!(hal.take_ops(), vec![HalOp::RedirectSet { port: PORT }]);
}

#[test]
fn test_oper_cached_while_global_down() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_up(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::GlobalDown);
    assert!(fsm.oper_up());
    assert!(hal.take_ops().is_empty());

    // The cached state selects the branch on enable.
    fsm.port_global_enable(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::LocalUp);
}

#[test]
fn test_global_disable_admin_disables() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(&hal).unwrap();
    hal.take_ops();

    fsm.port_global_disable(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::GlobalDown);
    assert!(!fsm.admin_up());
    assert_eq!(
        hal.take_ops(),
        vec![
            HalOp::AdminSet { port: PORT, up: false },
            HalOp::RedirectClear { port: PORT },
        ]
    );
}

#[test]
fn test_global_down_keeps_admin_state() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_up(&hal).unwrap();
    fsm.port_global_enable(&hal).unwrap();
    hal.take_ops();

    fsm.port_global_down(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::GlobalDown);
    assert!(fsm.admin_up(), "global oper down must not admin-disable");
    assert!(hal.take_ops().is_empty());
}

#[test]
fn test_port_del_from_any_state() {
    let hal = RecordingHal::new();
    let mut fsm = fsm_in_global_down();
    fsm.port_global_enable(&hal).unwrap();
    hal.take_ops();

    fsm.port_del(&hal).unwrap();
    assert_eq!(fsm.state(), LocalState::Idle);
    assert_eq!(
        hal.take_ops(),
        vec![
            HalOp::AdminSet { port: PORT, up: false },
            HalOp::RedirectClear { port: PORT },
        ]
    );
}
