// tests/property/roundtrip_test.rs

//! Property-based tests for PDU wire round-trips: for every opcode,
//! encode(decode(frame)) reproduces the frame exactly.

use bytes::BytesMut;
use mlagd::core::protocol::wire::{
    FlushAckPdu, FlushRequestPdu, KeyFilter, MacAgeBatch, MacAgeEntry, MacLearnBatch,
    MacLearnEntry, Pdu, PeerPortOperChangePdu, PortGlobalStatePdu, PortListPdu, PortOperState,
    PortsOperUpdatePdu, SyncDonePdu,
};
use mlagd::core::protocol::PduCodec;
use mlagd::core::types::{FdbEntryType, MacAddr};
use proptest::prelude::*;
use tokio_util::codec::{Decoder, Encoder};

fn arb_mac() -> impl Strategy<Value = MacAddr> {
    any::<[u8; 6]>().prop_map(MacAddr)
}

fn arb_entry_type() -> impl Strategy<Value = FdbEntryType> {
    prop_oneof![
        Just(FdbEntryType::Static),
        Just(FdbEntryType::DynamicAgeable),
        Just(FdbEntryType::DynamicNonAgeable),
    ]
}

fn arb_oper_state() -> impl Strategy<Value = PortOperState> {
    prop_oneof![Just(PortOperState::Down), Just(PortOperState::Up)]
}

fn arb_global_state() -> impl Strategy<Value = mlagd::core::protocol::wire::GlobalPortState> {
    use mlagd::core::protocol::wire::GlobalPortState;
    prop_oneof![
        Just(GlobalPortState::Disabled),
        Just(GlobalPortState::Enabled),
        Just(GlobalPortState::OperDown),
        Just(GlobalPortState::OperUp),
    ]
}

fn arb_learn_entry() -> impl Strategy<Value = MacLearnEntry> {
    (
        any::<u16>(),
        arb_mac(),
        any::<u32>(),
        arb_entry_type(),
        any::<u32>(),
        0u8..2,
    )
        .prop_map(|(vid, mac, port, entry_type, port_cookie, originator)| MacLearnEntry {
            vid,
            mac,
            port,
            entry_type,
            port_cookie,
            originator,
        })
}

fn arb_age_entry() -> impl Strategy<Value = MacAgeEntry> {
    (any::<u16>(), arb_mac(), 0u8..2).prop_map(|(vid, mac, originator)| MacAgeEntry {
        vid,
        mac,
        originator,
    })
}

fn arb_port_pdu() -> impl Strategy<Value = Pdu> {
    prop_oneof![
        (any::<bool>(), 0u8..2, prop::collection::vec(any::<u32>(), 0..64)).prop_map(
            |(del_ports, mlag_id, port_ids)| Pdu::PortsSync(PortListPdu {
                del_ports,
                mlag_id,
                port_ids,
            })
        ),
        (any::<bool>(), 0u8..2, prop::collection::vec(any::<u32>(), 0..64)).prop_map(
            |(del_ports, mlag_id, port_ids)| Pdu::PortsUpdate(PortListPdu {
                del_ports,
                mlag_id,
                port_ids,
            })
        ),
        (
            0u8..2,
            prop::collection::vec((any::<u32>(), arb_oper_state()), 0..64)
        )
            .prop_map(|(mlag_id, states)| Pdu::PortsOperUpdate(PortsOperUpdatePdu {
                mlag_id,
                states
            })),
        prop::collection::vec((any::<u32>(), arb_global_state()), 0..64)
            .prop_map(|states| Pdu::PortGlobalState(PortGlobalStatePdu { states })),
        (0u8..2, any::<u32>(), arb_oper_state(), any::<bool>()).prop_map(
            |(mlag_id, port_id, state, is_ipl)| Pdu::PeerPortOperChange(PeerPortOperChangePdu {
                mlag_id,
                port_id,
                state,
                is_ipl,
            })
        ),
        (0u8..2, any::<u8>(), any::<u8>()).prop_map(|(peer_id, state, sync_type)| {
            Pdu::PortsSyncDone(SyncDonePdu {
                peer_id,
                state,
                sync_type,
            })
        }),
    ]
}

fn arb_mac_sync_pdu() -> impl Strategy<Value = Pdu> {
    prop_oneof![
        prop::collection::vec(arb_learn_entry(), 0..32)
            .prop_map(|entries| Pdu::MacLocalLearn(MacLearnBatch { entries })),
        prop::collection::vec(arb_learn_entry(), 0..32)
            .prop_map(|entries| Pdu::MacGlobalLearn(MacLearnBatch { entries })),
        prop::collection::vec(arb_age_entry(), 0..32)
            .prop_map(|entries| Pdu::MacLocalAge(MacAgeBatch { entries })),
        prop::collection::vec(arb_age_entry(), 0..32)
            .prop_map(|entries| Pdu::MacGlobalAge(MacAgeBatch { entries })),
        (
            any::<bool>(),
            any::<bool>(),
            any::<u16>(),
            any::<u32>(),
            0u8..2,
            any::<bool>(),
            prop::collection::vec((any::<u16>(), arb_mac()), 0..32)
        )
            .prop_map(|(by_vid, by_port, vid, port, origin_peer, non_mlag, macs)| {
                Pdu::FlushPeerStart(FlushRequestPdu {
                    filter: KeyFilter {
                        by_vid,
                        by_port,
                        vid,
                        port,
                    },
                    origin_peer,
                    non_mlag,
                    macs,
                })
            }),
        (any::<u64>(), 0u8..2)
            .prop_map(|(key, peer_id)| Pdu::FlushAck(FlushAckPdu { key, peer_id })),
        (0u8..2).prop_map(|peer_id| Pdu::AllFdbGet { peer_id }),
        prop::collection::vec(arb_learn_entry(), 0..64)
            .prop_map(|entries| Pdu::AllFdbExport(MacLearnBatch { entries })),
    ]
}

fn arb_pdu() -> impl Strategy<Value = Pdu> {
    prop_oneof![arb_port_pdu(), arb_mac_sync_pdu()]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_pdu_roundtrip(pdu in arb_pdu()) {
        let mut codec = PduCodec::new(4 * 1024 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(pdu.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded, pdu);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_survives_byte_wise_delivery(pdu in arb_pdu()) {
        let mut codec = PduCodec::new(4 * 1024 * 1024);
        let mut full = BytesMut::new();
        codec.encode(pdu.clone(), &mut full).unwrap();
        let bytes = full.to_vec();

        // Deliver in two arbitrary halves, as TCP may.
        let split = bytes.len() / 2;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes[..split]);
        let first_try = codec.decode(&mut buf).unwrap();
        buf.extend_from_slice(&bytes[split..]);
        let decoded = match first_try {
            Some(early) => early,
            None => codec.decode(&mut buf).unwrap().unwrap(),
        };
        prop_assert_eq!(decoded, pdu);
    }

    #[test]
    fn test_encode_to_vec_matches_codec(pdu in arb_pdu()) {
        let mut codec = PduCodec::new(4 * 1024 * 1024);
        let mut buf = BytesMut::new();
        codec.encode(pdu.clone(), &mut buf).unwrap();
        prop_assert_eq!(buf.to_vec(), pdu.encode_to_vec());
    }
}
