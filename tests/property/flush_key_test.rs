// tests/property/flush_key_test.rs

//! Properties of the packed flush key and the peer bitmap algebra.

use mlagd::core::flush::{FlushKey, NON_MLAG_BIT};
use mlagd::core::protocol::wire::KeyFilter;
use mlagd::core::types::PeerSet;
use proptest::prelude::*;

fn arb_filter() -> impl Strategy<Value = KeyFilter> {
    (any::<bool>(), any::<bool>(), any::<u16>(), any::<u32>()).prop_map(
        |(by_vid, by_port, vid, port)| KeyFilter {
            by_vid,
            by_port,
            vid,
            port,
        },
    )
}

proptest! {
    #[test]
    fn test_key_fields_survive_packing(
        filter in arb_filter(),
        origin in 0u8..2,
        non_mlag in any::<bool>(),
    ) {
        let key = FlushKey::from_request(&filter, origin, non_mlag);
        let reparsed = FlushKey::from_raw(key.raw());
        prop_assert_eq!(key, reparsed);

        if filter.by_vid {
            prop_assert_eq!(key.vid(), filter.vid);
        } else {
            prop_assert_eq!(key.vid(), 0);
        }
        if filter.by_port {
            prop_assert_eq!(key.port(), filter.port);
        } else {
            prop_assert_eq!(key.port(), 0);
        }
        if non_mlag {
            prop_assert_eq!(key.non_mlag_part(), origin | NON_MLAG_BIT as u8);
        } else {
            prop_assert_eq!(key.non_mlag_part(), 0);
        }
    }

    #[test]
    fn test_non_mlag_keys_never_collide_across_origins(
        filter in arb_filter(),
    ) {
        let a = FlushKey::from_request(&filter, 0, true);
        let b = FlushKey::from_request(&filter, 1, true);
        prop_assert_ne!(a.raw(), b.raw());
    }

    #[test]
    fn test_key_blocks_its_own_scope(
        vid in 1u16..4095,
        port in 1u32..1000,
        origin in 0u8..2,
        non_mlag in any::<bool>(),
    ) {
        let filter = KeyFilter { by_vid: true, by_port: true, vid, port };
        let key = FlushKey::from_request(&filter, origin, non_mlag);
        let class = if non_mlag { origin | NON_MLAG_BIT as u8 } else { 0 };
        prop_assert!(key.blocks_learn(vid, port, class));
        prop_assert!(!key.blocks_learn(vid.wrapping_add(1), port, class));
        prop_assert!(!key.blocks_learn(vid, port + 1, class));
    }

    #[test]
    fn test_peer_set_oper_subset_invariant(conf in 0u32..4, oper in 0u32..4) {
        // Clearing non-configured bits always restores the invariant.
        let configured = PeerSet::from_bits(conf);
        let mut oper_up = PeerSet::from_bits(oper);
        for peer in oper_up.iter().collect::<Vec<_>>() {
            if !configured.contains(peer) {
                oper_up.remove(peer);
            }
        }
        prop_assert!(oper_up.is_subset_of(configured));
    }
}
