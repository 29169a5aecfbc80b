use mlagd::core::fdb::router_macs::RouterMacSync;
use mlagd::core::fdb::RouterMacDb;
use mlagd::core::types::{MacAddr, NON_MLAG_PORT};
use mlagd::MlagError;

const LOCAL: u8 = 0;

fn mac(last: u8) -> MacAddr {
    MacAddr([0x02, 0, 0, 0, 0x10, last])
}

#[test]
fn test_add_stages_static_learn() {
    let mut db = RouterMacDb::new(4, LOCAL);
    let sync = db.configure(10, mac(1), true).unwrap().unwrap();
    let RouterMacSync::Learn(learn) = sync else {
        panic!("expected a staged learn");
    };
    assert!(learn.entry_type.is_static());
    assert_eq!(learn.port, NON_MLAG_PORT);
    assert_eq!(learn.originator, LOCAL);
    assert_eq!(db.len(), 1);
}

#[test]
fn test_remove_stages_age_and_leaves_on_sync() {
    let mut db = RouterMacDb::new(4, LOCAL);
    db.configure(10, mac(1), true).unwrap();
    db.mark_synced(10, mac(1));

    let sync = db.configure(10, mac(1), false).unwrap().unwrap();
    assert!(matches!(sync, RouterMacSync::Age(_)));
    // Still present until the removal is pushed.
    assert_eq!(db.len(), 1);

    db.mark_synced(10, mac(1));
    assert_eq!(db.len(), 0);
}

#[test]
fn test_remove_unknown_is_not_found() {
    let mut db = RouterMacDb::new(4, LOCAL);
    assert!(matches!(
        db.configure(10, mac(9), false),
        Err(MlagError::NotFound(_))
    ));
}

#[test]
fn test_capacity_bound() {
    let mut db = RouterMacDb::new(2, LOCAL);
    db.configure(10, mac(1), true).unwrap();
    db.configure(10, mac(2), true).unwrap();
    assert!(matches!(
        db.configure(10, mac(3), true),
        Err(MlagError::Capacity(_))
    ));
}

#[test]
fn test_unsynced_replay() {
    let mut db = RouterMacDb::new(4, LOCAL);
    db.configure(10, mac(1), true).unwrap();
    db.configure(20, mac(2), true).unwrap();
    db.mark_synced(10, mac(1));

    let pending = db.unsynced();
    assert_eq!(pending.len(), 1);

    // A role change flags everything for re-push.
    db.reset_sync();
    assert_eq!(db.unsynced().len(), 2);
}

#[test]
fn test_global_age_restages_wanted_mac() {
    let mut db = RouterMacDb::new(4, LOCAL);
    db.configure(10, mac(1), true).unwrap();
    db.mark_synced(10, mac(1));

    let learn = db.on_global_age(10, mac(1)).unwrap();
    assert_eq!(learn.mac, mac(1));
    assert_eq!(db.unsynced().len(), 1);

    // A MAC being removed is not re-staged.
    db.configure(10, mac(1), false).unwrap();
    assert!(db.on_global_age(10, mac(1)).is_none());
}
