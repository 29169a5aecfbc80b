use mlagd::config::FlushConfig;
use mlagd::core::events::{EventBus, SystemEvent};
use mlagd::core::flush::{FlushCoordinator, FlushKey, FlushStartOutcome, NON_MLAG_BIT};
use mlagd::core::protocol::wire::KeyFilter;
use mlagd::core::types::PeerSet;
use std::time::Duration;

fn filter(vid: Option<u16>, port: Option<u32>) -> KeyFilter {
    KeyFilter {
        by_vid: vid.is_some(),
        by_port: port.is_some(),
        vid: vid.unwrap_or(0),
        port: port.unwrap_or(0),
    }
}

fn coordinator(cfg: FlushConfig) -> (FlushCoordinator, mlagd::core::events::EventQueues) {
    let (bus, queues) = EventBus::new();
    (FlushCoordinator::new(&cfg, bus), queues)
}

fn default_cfg() -> FlushConfig {
    FlushConfig {
        ack_timeout: Duration::from_millis(100),
        port_vid_pool: 4,
        system_pool: 4,
    }
}

#[test]
fn test_key_packing() {
    let key = FlushKey::from_request(&filter(Some(10), Some(7)), 1, false);
    assert_eq!(key.vid(), 10);
    assert_eq!(key.port(), 7);
    assert_eq!(key.non_mlag_part(), 0);

    let nm = FlushKey::from_request(&filter(None, Some(7)), 1, true);
    assert_eq!(nm.non_mlag_part(), 1 | NON_MLAG_BIT as u8);
    // Non-MLAG flushes from different peers never collide.
    let nm_other = FlushKey::from_request(&filter(None, Some(7)), 0, true);
    assert_ne!(nm.raw(), nm_other.raw());

    let global = FlushKey::from_request(&filter(None, None), 0, false);
    assert!(global.is_global());
    assert_eq!(global.raw(), 0);
}

#[test]
fn test_key_blocks_learn_scopes() {
    let global = FlushKey::GLOBAL;
    assert!(global.blocks_learn(10, 5, 0));
    assert!(global.blocks_learn(11, 9, 0));

    let by_vid = FlushKey::from_request(&filter(Some(10), None), 0, false);
    assert!(by_vid.blocks_learn(10, 5, 0));
    assert!(!by_vid.blocks_learn(11, 5, 0));

    let by_port_vid = FlushKey::from_request(&filter(Some(10), Some(5)), 0, false);
    assert!(by_port_vid.blocks_learn(10, 5, 0));
    assert!(!by_port_vid.blocks_learn(10, 6, 0));

    // A non-MLAG-keyed flush only blocks learns of the same origin class.
    let nm = FlushKey::from_request(&filter(None, Some(9)), 1, true);
    let class = 1 | NON_MLAG_BIT as u8;
    assert!(nm.blocks_learn(10, 9, class));
    assert!(!nm.blocks_learn(10, 9, 0));
}

#[tokio::test]
async fn test_start_ack_complete() {
    let (mut c, _queues) = coordinator(default_cfg());
    let key = FlushKey::from_request(&filter(Some(10), None), 0, false);

    assert_eq!(
        c.start(key, PeerSet::from_bits(0b11)),
        FlushStartOutcome::Started
    );
    assert!(c.is_busy(key));
    assert_eq!(c.busy_count(), 1);

    assert!(!c.peer_ack(key, 0));
    assert!(c.peer_ack(key, 1));
    assert!(!c.is_busy(key));
    assert_eq!(c.counters().completed, 1);
}

#[tokio::test]
async fn test_duplicate_start_ignored() {
    let (mut c, _queues) = coordinator(default_cfg());
    let key = FlushKey::GLOBAL;
    c.start(key, PeerSet::from_bits(0b01));
    assert_eq!(
        c.start(key, PeerSet::from_bits(0b01)),
        FlushStartOutcome::Duplicate
    );
    assert_eq!(c.counters().duplicates, 1);
}

#[tokio::test]
async fn test_pool_exhaustion_drops() {
    let cfg = FlushConfig {
        system_pool: 1,
        ..default_cfg()
    };
    let (mut c, _queues) = coordinator(cfg);
    let first = FlushKey::from_request(&filter(Some(1), None), 0, false);
    let second = FlushKey::from_request(&filter(Some(2), None), 0, false);

    assert_eq!(c.start(first, PeerSet::from_bits(0b01)), FlushStartOutcome::Started);
    assert_eq!(c.start(second, PeerSet::from_bits(0b01)), FlushStartOutcome::Dropped);
    assert_eq!(c.counters().pool_drops, 1);

    // Completion returns the FSM to the pool.
    c.peer_ack(first, 0);
    assert_eq!(c.start(second, PeerSet::from_bits(0b01)), FlushStartOutcome::Started);
}

#[tokio::test]
async fn test_port_vid_keys_use_their_own_pool() {
    let cfg = FlushConfig {
        port_vid_pool: 1,
        system_pool: 1,
        ..default_cfg()
    };
    let (mut c, _queues) = coordinator(cfg);
    let pv = FlushKey::from_request(&filter(Some(10), Some(5)), 0, false);
    let sys = FlushKey::from_request(&filter(Some(10), None), 0, false);

    assert_eq!(c.start(pv, PeerSet::from_bits(0b01)), FlushStartOutcome::Started);
    // The system pool is untouched by the (port, vid) allocation.
    assert_eq!(c.start(sys, PeerSet::from_bits(0b01)), FlushStartOutcome::Started);
}

#[tokio::test]
async fn test_peer_down_is_implicit_ack() {
    let (mut c, _queues) = coordinator(default_cfg());
    let key = FlushKey::GLOBAL;
    c.start(key, PeerSet::from_bits(0b11));
    c.peer_ack(key, 0);

    let done = c.peer_down(1);
    assert_eq!(done, vec![key]);
    assert!(!c.is_busy(key));
}

#[tokio::test]
async fn test_timer_fires_event_and_completes() {
    let (mut c, mut queues) = coordinator(FlushConfig {
        ack_timeout: Duration::from_millis(20),
        ..default_cfg()
    });
    let key = FlushKey::from_request(&filter(Some(10), Some(5)), 1, false);
    c.start(key, PeerSet::from_bits(0b11));

    // The armed timer posts FlushFsmTimer with the packed key.
    let event = tokio::time::timeout(Duration::from_secs(1), queues.medium_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let SystemEvent::FlushFsmTimer { key: raw } = event else {
        panic!("expected flush timer event, got {}", event.name());
    };
    assert_eq!(raw, key.raw());

    assert!(c.timer_fired(FlushKey::from_raw(raw)));
    assert!(!c.is_busy(key));
    assert_eq!(c.counters().timeouts, 1);
}

#[tokio::test]
async fn test_ack_after_completion_is_ignored() {
    let (mut c, _queues) = coordinator(default_cfg());
    let key = FlushKey::GLOBAL;
    c.start(key, PeerSet::from_bits(0b01));
    assert!(c.peer_ack(key, 0));
    assert!(!c.peer_ack(key, 0));
}

#[tokio::test]
async fn test_stop_abandons_everything() {
    let (mut c, _queues) = coordinator(default_cfg());
    for vid in 1..=3u16 {
        let key = FlushKey::from_request(&filter(Some(vid), None), 0, false);
        c.start(key, PeerSet::from_bits(0b11));
    }
    assert_eq!(c.busy_count(), 3);
    c.stop();
    assert_eq!(c.busy_count(), 0);

    // Pool capacity is fully restored.
    for vid in 1..=4u16 {
        let key = FlushKey::from_request(&filter(Some(vid), None), 0, false);
        assert_eq!(c.start(key, PeerSet::from_bits(0b01)), FlushStartOutcome::Started);
    }
}

#[tokio::test]
async fn test_blocks_learn_only_while_busy() {
    let (mut c, _queues) = coordinator(default_cfg());
    let key = FlushKey::from_request(&filter(Some(10), Some(5)), 0, false);
    assert!(!c.blocks_learn(10, 5, 0));

    c.start(key, PeerSet::from_bits(0b01));
    assert!(c.blocks_learn(10, 5, 0));
    assert!(!c.blocks_learn(10, 6, 0));

    c.peer_ack(key, 0);
    assert!(!c.blocks_learn(10, 5, 0));
}
