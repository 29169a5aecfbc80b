// src/core/port/db.rs

//! The keyed store of per-MLAG-port records.
//!
//! Each entry carries its own exclusive lock; the dispatcher task is the
//! only writer in normal flow, but management getters (counters, dump) may
//! run from other tasks. `for_each` holds each entry's lock across the
//! visitor call, so visitors must not acquire other port locks.

use crate::core::errors::MlagError;
use crate::core::metrics;
use crate::core::port::local_fsm::PortLocalFsm;
use crate::core::port::master_fsm::PortMasterFsm;
use crate::core::port::remote_fsm::PortRemoteFsm;
use crate::core::types::{MAX_PEERS, PeerId, PeerSet, PeerState, PortId, PortMode};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Protocol message tallies for the port manager.
#[derive(Debug, Default)]
pub struct PortManagerCounters {
    pub rx_protocol_msg: AtomicU64,
    pub tx_protocol_msg: AtomicU64,
}

impl PortManagerCounters {
    pub fn clear(&self) {
        self.rx_protocol_msg.store(0, Ordering::Relaxed);
        self.tx_protocol_msg.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.rx_protocol_msg.load(Ordering::Relaxed),
            self.tx_protocol_msg.load(Ordering::Relaxed),
        )
    }
}

/// One MLAG port row. Exists iff some peer has the port configured.
#[derive(Debug)]
pub struct PortEntry {
    pub port_id: PortId,
    pub mode: PortMode,
    /// Bit *i* set iff peer *i* owns this MLAG port.
    pub peers_configured: PeerSet,
    /// Bit *i* set iff peer *i* reports its local link up. Always a subset
    /// of `peers_configured`.
    pub peers_oper_up: PeerSet,
    pub local_fsm: PortLocalFsm,
    pub remote_fsm: PortRemoteFsm,
    pub master_fsm: PortMasterFsm,
}

impl PortEntry {
    fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            mode: PortMode::default(),
            peers_configured: PeerSet::EMPTY,
            peers_oper_up: PeerSet::EMPTY,
            local_fsm: PortLocalFsm::new(port_id),
            remote_fsm: PortRemoteFsm::new(port_id),
            master_fsm: PortMasterFsm::new(port_id),
        }
    }
}

pub struct PortDb {
    ports: DashMap<PortId, Arc<Mutex<PortEntry>>>,
    peer_state: Mutex<[PeerState; MAX_PEERS]>,
    counters: PortManagerCounters,
    max_ports: usize,
}

impl PortDb {
    pub fn new(max_ports: usize) -> Self {
        Self {
            ports: DashMap::new(),
            peer_state: Mutex::new([PeerState::Down; MAX_PEERS]),
            counters: PortManagerCounters::default(),
            max_ports,
        }
    }

    pub fn exists(&self, port_id: PortId) -> bool {
        self.ports.contains_key(&port_id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Returns the entry for `port_id`, creating it if absent. Fails with
    /// `Capacity` once the pool is exhausted.
    pub fn allocate(&self, port_id: PortId) -> Result<Arc<Mutex<PortEntry>>, MlagError> {
        if let Some(entry) = self.ports.get(&port_id) {
            return Ok(entry.clone());
        }
        if self.ports.len() >= self.max_ports {
            return Err(MlagError::Capacity("port pool"));
        }
        let entry = Arc::new(Mutex::new(PortEntry::new(port_id)));
        self.ports.insert(port_id, entry.clone());
        metrics::MLAG_PORTS.set(self.ports.len() as f64);
        Ok(entry)
    }

    pub fn lookup(&self, port_id: PortId) -> Option<Arc<Mutex<PortEntry>>> {
        self.ports.get(&port_id).map(|e| e.clone())
    }

    pub fn delete(&self, port_id: PortId) -> Result<(), MlagError> {
        self.ports
            .remove(&port_id)
            .ok_or_else(|| MlagError::NotFound(format!("port {port_id}")))?;
        metrics::MLAG_PORTS.set(self.ports.len() as f64);
        Ok(())
    }

    /// Applies `visitor` to every entry, entry lock held across the call.
    /// Lock order is strictly one entry at a time.
    pub fn for_each(&self, mut visitor: impl FnMut(&mut PortEntry)) {
        for item in self.ports.iter() {
            let mut entry = item.value().lock();
            visitor(&mut entry);
        }
    }

    pub fn port_ids(&self) -> Vec<PortId> {
        let mut ids: Vec<PortId> = self.ports.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn peer_state_get(&self, peer: PeerId) -> PeerState {
        self.peer_state
            .lock()
            .get(peer as usize)
            .copied()
            .unwrap_or(PeerState::Down)
    }

    pub fn peer_state_set(&self, peer: PeerId, state: PeerState) {
        if let Some(slot) = self.peer_state.lock().get_mut(peer as usize) {
            *slot = state;
        }
    }

    pub fn clear_peer_states(&self) {
        *self.peer_state.lock() = [PeerState::Down; MAX_PEERS];
    }

    /// The set of peers that currently count toward the all-peers-active
    /// quorum.
    pub fn active_peers(&self) -> PeerSet {
        let states = self.peer_state.lock();
        let mut set = PeerSet::EMPTY;
        for (idx, state) in states.iter().enumerate() {
            if state.is_active() {
                set.insert(idx as PeerId);
            }
        }
        set
    }

    pub fn counters(&self) -> &PortManagerCounters {
        &self.counters
    }
}
