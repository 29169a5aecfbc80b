use mlagd::core::events::{EventBus, Priority, SystemEvent};
use mlagd::MlagError;

#[tokio::test]
async fn test_events_delivered_fifo_within_a_level() {
    let (bus, mut queues) = EventBus::new();
    for peer_id in 0..3u8 {
        bus.post(Priority::Medium, SystemEvent::PeerStart { peer_id })
            .await
            .unwrap();
    }
    for expected in 0..3u8 {
        let event = queues.medium_rx.recv().await.unwrap();
        let SystemEvent::PeerStart { peer_id } = event else {
            panic!("wrong event");
        };
        assert_eq!(peer_id, expected);
    }
}

#[tokio::test]
async fn test_levels_are_independent_queues() {
    let (bus, mut queues) = EventBus::new();
    bus.post(Priority::Low, SystemEvent::StopDone).await.unwrap();
    bus.post(Priority::High, SystemEvent::Deinit).await.unwrap();

    // Each level drains from its own receiver.
    assert!(matches!(
        queues.high_rx.recv().await.unwrap(),
        SystemEvent::Deinit
    ));
    assert!(matches!(
        queues.low_rx.recv().await.unwrap(),
        SystemEvent::StopDone
    ));
}

#[tokio::test]
async fn test_post_after_receiver_dropped_is_cancelled() {
    let (bus, queues) = EventBus::new();
    drop(queues);
    let err = bus
        .post(Priority::Medium, SystemEvent::Reconnect)
        .await
        .unwrap_err();
    assert_eq!(err, MlagError::Cancelled);
}

#[tokio::test]
async fn test_post_nowait_drops_on_full_queue() {
    let (bus, mut queues) = EventBus::new();
    // The high queue is intentionally small; overfill it.
    for _ in 0..1000 {
        bus.post_nowait(Priority::High, SystemEvent::Reconnect);
    }
    // Whatever was dropped, the queue still drains cleanly.
    let mut drained = 0;
    while queues.high_rx.try_recv().is_ok() {
        drained += 1;
    }
    assert!(drained > 0);
    assert!(drained < 1000);
}

#[test]
fn test_event_names_are_stable() {
    assert_eq!(SystemEvent::Deinit.name(), "DEINIT");
    assert_eq!(SystemEvent::Reconnect.name(), "RECONNECT");
    assert_eq!(
        SystemEvent::PeerStart { peer_id: 0 }.name(),
        "PEER_START"
    );
    assert_eq!(
        SystemEvent::FlushFsmTimer { key: 0 }.name(),
        "FLUSH_FSM_TIMER"
    );
}
