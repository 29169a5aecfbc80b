use mlagd::core::types::{MacAddr, PeerSet};
use std::str::FromStr;

#[test]
fn test_peer_set_insert_remove() {
    let mut set = PeerSet::EMPTY;
    assert!(set.is_empty());
    set.insert(0);
    set.insert(1);
    assert_eq!(set.len(), 2);
    assert!(set.contains(0));
    set.remove(0);
    assert!(!set.contains(0));
    assert!(set.contains(1));
}

#[test]
fn test_peer_set_subset() {
    let conf = PeerSet::from_bits(0b11);
    let oper = PeerSet::from_bits(0b01);
    assert!(oper.is_subset_of(conf));
    assert!(!conf.is_subset_of(oper));
    assert!(PeerSet::EMPTY.is_subset_of(conf));
}

#[test]
fn test_peer_set_with_without() {
    let set = PeerSet::single(0);
    assert_eq!(set.with(1), PeerSet::from_bits(0b11));
    assert_eq!(set.without(0), PeerSet::EMPTY);
    // The originals are untouched.
    assert_eq!(set, PeerSet::single(0));
}

#[test]
fn test_peer_set_iter() {
    let set = PeerSet::from_bits(0b10);
    let peers: Vec<u8> = set.iter().collect();
    assert_eq!(peers, vec![1]);
}

#[test]
fn test_mac_parse_and_display() {
    let mac = MacAddr::from_str("aa:bb:cc:dd:ee:ff").unwrap();
    assert_eq!(mac.octets(), [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
    assert_eq!(mac.to_string(), "aa:bb:cc:dd:ee:ff");
}

#[test]
fn test_mac_parse_rejects_garbage() {
    assert!(MacAddr::from_str("aa:bb:cc").is_err());
    assert!(MacAddr::from_str("aa:bb:cc:dd:ee:ff:00").is_err());
    assert!(MacAddr::from_str("zz:bb:cc:dd:ee:ff").is_err());
}

#[test]
fn test_mac_unicast_bit() {
    assert!(MacAddr([0x02, 0, 0, 0, 0, 1]).is_unicast());
    assert!(!MacAddr([0x01, 0, 0x5e, 0, 0, 1]).is_unicast());
}
