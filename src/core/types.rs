// src/core/types.rs

//! Primitive identifiers shared across the daemon: peer slots and bitmaps,
//! MAC addresses, port ids, and the master-election role.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;

/// Number of peer slots in every bitmap and liveness table. Two-chassis MLAG
/// is the only deployment shape the protocol supports today.
pub const MAX_PEERS: usize = 2;

/// Upper bound on MLAG port rows in the port database.
pub const MAX_PORTS: usize = 64;

/// Wire sentinel for a port that exists on only one peer. Learns from such
/// ports still synchronize, but the true port id travels in the cookie field.
pub const NON_MLAG_PORT: u32 = 0xffff_ffff;

/// In-memory port ids are wider than the wire format; the transport
/// truncates them to 32 bits.
pub type PortId = u64;

pub type Vid = u16;

pub type PeerId = u8;

/// The role this node holds after master election. Election itself happens
/// outside this daemon; we only react to its status-change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum Role {
    Master,
    Slave,
    Standalone,
}

/// Liveness of a peer slot as reported by the health manager. Only
/// `Enabled` and `TxEnabled` peers count toward the all-peers-active quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum PeerState {
    #[default]
    Down,
    Enabled,
    TxEnabled,
}

impl PeerState {
    pub fn is_active(self) -> bool {
        matches!(self, PeerState::Enabled | PeerState::TxEnabled)
    }
}

/// Aggregation mode of an MLAG port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display)]
pub enum PortMode {
    #[default]
    Static,
    Lacp,
}

/// Classification of a unicast FDB entry. `DynamicNonAgeable` is what a
/// remote-owned dynamic entry becomes on the local chip so the hardware
/// stops aging it; aging decisions belong to the owning peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum FdbEntryType {
    Static,
    DynamicAgeable,
    DynamicNonAgeable,
}

impl FdbEntryType {
    pub fn is_static(self) -> bool {
        matches!(self, FdbEntryType::Static)
    }

    pub fn is_dynamic(self) -> bool {
        !self.is_static()
    }

    pub fn to_wire(self) -> u8 {
        match self {
            FdbEntryType::Static => 0,
            FdbEntryType::DynamicAgeable => 1,
            FdbEntryType::DynamicNonAgeable => 2,
        }
    }

    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(FdbEntryType::Static),
            1 => Some(FdbEntryType::DynamicAgeable),
            2 => Some(FdbEntryType::DynamicNonAgeable),
            _ => None,
        }
    }
}

/// A set of peer slots packed into a small bitmap, bit *i* set iff peer *i*
/// is a member. This is the in-memory shape of `peers_configured`,
/// `peers_oper_up` and every flush/owner bitmap.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct PeerSet(u32);

impl PeerSet {
    pub const EMPTY: PeerSet = PeerSet(0);

    pub fn from_bits(bits: u32) -> Self {
        PeerSet(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn single(peer: PeerId) -> Self {
        let mut set = PeerSet::EMPTY;
        set.insert(peer);
        set
    }

    // Peer ids come off the wire; out-of-range values are ignored rather
    // than shifted into oblivion.
    pub fn insert(&mut self, peer: PeerId) {
        if (peer as usize) < MAX_PEERS {
            self.0 |= 1 << peer;
        }
    }

    pub fn remove(&mut self, peer: PeerId) {
        if (peer as usize) < MAX_PEERS {
            self.0 &= !(1 << peer);
        }
    }

    pub fn contains(self, peer: PeerId) -> bool {
        (peer as usize) < MAX_PEERS && self.0 & (1 << peer) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_subset_of(self, other: PeerSet) -> bool {
        self.0 & !other.0 == 0
    }

    #[must_use]
    pub fn with(self, peer: PeerId) -> Self {
        let mut set = self;
        set.insert(peer);
        set
    }

    #[must_use]
    pub fn without(self, peer: PeerId) -> Self {
        let mut set = self;
        set.remove(peer);
        set
    }

    pub fn iter(self) -> impl Iterator<Item = PeerId> {
        (0..MAX_PEERS as u8).filter(move |p| self.contains(*p))
    }
}

impl fmt::Debug for PeerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerSet({:#b})", self.0)
    }
}

/// A unicast MAC address. Kept as raw bytes; formatting is only for logs
/// and the management dump.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Multicast/broadcast MACs never enter the unicast FDB.
    pub fn is_unicast(&self) -> bool {
        self.0[0] & 0x01 == 0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for MacAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut count = 0;
        for part in s.split(':') {
            if count == 6 {
                return Err(format!("'{s}' is not a MAC address"));
            }
            octets[count] =
                u8::from_str_radix(part, 16).map_err(|_| format!("'{s}' is not a MAC address"))?;
            count += 1;
        }
        if count != 6 {
            return Err(format!("'{s}' is not a MAC address"));
        }
        Ok(MacAddr(octets))
    }
}
