use mlagd::core::port::PortDb;
use mlagd::core::types::{PeerSet, PeerState};
use mlagd::MlagError;

#[test]
fn test_allocate_and_lookup() {
    let db = PortDb::new(8);
    assert!(!db.exists(100));
    let entry = db.allocate(100).unwrap();
    assert_eq!(entry.lock().port_id, 100);
    assert!(db.exists(100));
    assert_eq!(db.len(), 1);

    // Allocating an existing id returns the same entry.
    let again = db.allocate(100).unwrap();
    again.lock().peers_configured.insert(0);
    assert!(entry.lock().peers_configured.contains(0));
    assert_eq!(db.len(), 1);
}

#[test]
fn test_capacity_bound() {
    let db = PortDb::new(2);
    db.allocate(1).unwrap();
    db.allocate(2).unwrap();
    let err = db.allocate(3).unwrap_err();
    assert!(matches!(err, MlagError::Capacity(_)));

    // Freeing a slot makes room again.
    db.delete(1).unwrap();
    assert!(db.allocate(3).is_ok());
}

#[test]
fn test_delete_missing_is_not_found() {
    let db = PortDb::new(8);
    assert!(matches!(db.delete(42), Err(MlagError::NotFound(_))));
}

#[test]
fn test_for_each_visits_every_entry() {
    let db = PortDb::new(8);
    for id in [10u64, 20, 30] {
        db.allocate(id).unwrap();
    }
    let mut seen = Vec::new();
    db.for_each(|entry| seen.push(entry.port_id));
    seen.sort_unstable();
    assert_eq!(seen, vec![10, 20, 30]);
    assert_eq!(db.port_ids(), vec![10, 20, 30]);
}

#[test]
fn test_peer_liveness_and_active_set() {
    let db = PortDb::new(8);
    assert_eq!(db.active_peers(), PeerSet::EMPTY);

    db.peer_state_set(0, PeerState::Enabled);
    db.peer_state_set(1, PeerState::TxEnabled);
    assert_eq!(db.peer_state_get(0), PeerState::Enabled);
    assert_eq!(db.active_peers(), PeerSet::from_bits(0b11));

    db.peer_state_set(1, PeerState::Down);
    assert_eq!(db.active_peers(), PeerSet::from_bits(0b01));

    db.clear_peer_states();
    assert_eq!(db.active_peers(), PeerSet::EMPTY);
}

#[test]
fn test_counters() {
    let db = PortDb::new(8);
    db.counters()
        .rx_protocol_msg
        .fetch_add(3, std::sync::atomic::Ordering::Relaxed);
    assert_eq!(db.counters().snapshot(), (3, 0));
    db.counters().clear();
    assert_eq!(db.counters().snapshot(), (0, 0));
}
