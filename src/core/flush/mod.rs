// src/core/flush/mod.rs

//! Master-only flush coordination: one small FSM per flush key, pulled from
//! a bounded pool, waiting for an ACK from every peer whose liveness was up
//! when the flush started.
//!
//! Keys pack `(vid, port, non-MLAG origin bits)` into 64 bits. The non-MLAG
//! nibble keeps concurrent non-MLAG flushes from two peers from colliding
//! on the same key. A zero key is the global flush.

use crate::config::FlushConfig;
use crate::core::events::{EventBus, Priority, SystemEvent};
use crate::core::metrics;
use crate::core::protocol::wire::KeyFilter;
use crate::core::types::{PeerId, PeerSet, Vid};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

const KEY_PORT_SHIFT: u32 = 32;
const NON_MLAG_PART_SHIFT: u32 = 48;
/// Marks the origin nibble as a non-MLAG flush.
pub const NON_MLAG_BIT: u64 = 0x8;

/// A packed flush key: bits 0..32 port, 32..48 vid, 48..52 the non-MLAG
/// origin nibble. Unspecified fields are zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlushKey(u64);

impl FlushKey {
    pub const GLOBAL: FlushKey = FlushKey(0);

    pub fn from_raw(raw: u64) -> Self {
        FlushKey(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Packs the key for a flush request.
    pub fn from_request(filter: &KeyFilter, origin_peer: PeerId, non_mlag: bool) -> Self {
        let nm = if non_mlag {
            origin_peer as u64 | NON_MLAG_BIT
        } else {
            0
        };
        let mut key = 0u64;
        if filter.by_vid {
            key |= (filter.vid as u64 & 0xFFFF) << KEY_PORT_SHIFT;
        }
        if filter.by_port {
            key |= filter.port as u64 & 0xFFFF_FFFF;
        }
        FlushKey(key | (nm << NON_MLAG_PART_SHIFT))
    }

    pub fn vid(self) -> Vid {
        ((self.0 >> KEY_PORT_SHIFT) & 0xFFFF) as Vid
    }

    pub fn port(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    pub fn non_mlag_part(self) -> u8 {
        ((self.0 >> NON_MLAG_PART_SHIFT) & 0xF) as u8
    }

    pub fn is_global(self) -> bool {
        self.0 == 0
    }

    /// (port, vid) keys draw from the large pool; global / per-vid /
    /// per-port keys draw from the system pool.
    fn is_port_vid(self) -> bool {
        self.port() != 0 && self.vid() != 0
    }

    /// Whether a flush under this key blocks a learn on `(vid, port)` of
    /// the given origin class (`0` for MLAG learns, `origin | 0x8` for
    /// non-MLAG learns).
    pub fn blocks_learn(self, vid: Vid, port: u32, origin_class: u8) -> bool {
        let nm = self.non_mlag_part();
        if nm != 0 && nm != origin_class {
            return false;
        }
        let key_vid = self.vid();
        let key_port = self.port();
        (key_vid == 0 || key_vid == vid) && (key_port == 0 || key_port == port)
    }
}

impl fmt::Debug for FlushKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FlushKey(vid={}, port={}, nm={:#x})",
            self.vid(),
            self.port(),
            self.non_mlag_part()
        )
    }
}

/// Outcome of a flush start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushStartOutcome {
    /// A new FSM entered WaitPeers.
    Started,
    /// The key is already mid-flush; the duplicate is ignored.
    Duplicate,
    /// No peer is up; the flush completes immediately.
    NoPeers,
    /// The pool for this key class is exhausted; dropped with a counter.
    Dropped,
}

struct FlushFsm {
    /// Peers whose ACK is still pending.
    pending: PeerSet,
    timer: JoinHandle<()>,
}

/// Flush bookkeeping counters, read by the management dump.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlushCounters {
    pub started: u64,
    pub completed: u64,
    pub timeouts: u64,
    pub pool_drops: u64,
    pub duplicates: u64,
}

pub struct FlushCoordinator {
    active: HashMap<FlushKey, FlushFsm>,
    port_vid_free: usize,
    system_free: usize,
    ack_timeout: Duration,
    events: EventBus,
    counters: FlushCounters,
}

impl FlushCoordinator {
    pub fn new(cfg: &FlushConfig, events: EventBus) -> Self {
        Self {
            active: HashMap::new(),
            port_vid_free: cfg.port_vid_pool,
            system_free: cfg.system_pool,
            ack_timeout: cfg.ack_timeout,
            events,
            counters: FlushCounters::default(),
        }
    }

    pub fn counters(&self) -> FlushCounters {
        self.counters
    }

    pub fn busy_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_busy(&self, key: FlushKey) -> bool {
        self.active.contains_key(&key)
    }

    /// Consulted by learn admission: is any in-flight flush covering this
    /// (vid, port, origin-class)?
    pub fn blocks_learn(&self, vid: Vid, port: u32, origin_class: u8) -> bool {
        self.active
            .keys()
            .any(|key| key.blocks_learn(vid, port, origin_class))
    }

    /// Starts a flush FSM for `key`, snapshotting the currently-up peers
    /// as the ACK set.
    pub fn start(&mut self, key: FlushKey, peers_up: PeerSet) -> FlushStartOutcome {
        if self.active.contains_key(&key) {
            self.counters.duplicates += 1;
            return FlushStartOutcome::Duplicate;
        }
        if peers_up.is_empty() {
            return FlushStartOutcome::NoPeers;
        }
        let free = if key.is_port_vid() {
            &mut self.port_vid_free
        } else {
            &mut self.system_free
        };
        if *free == 0 {
            self.counters.pool_drops += 1;
            metrics::FLUSH_POOL_DROPS_TOTAL.inc();
            return FlushStartOutcome::Dropped;
        }
        *free -= 1;

        let events = self.events.clone();
        let timeout = self.ack_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            events.post_nowait(Priority::Medium, SystemEvent::FlushFsmTimer { key: key.raw() });
        });

        self.active.insert(
            key,
            FlushFsm {
                pending: peers_up,
                timer,
            },
        );
        self.counters.started += 1;
        metrics::FLUSH_FSMS_BUSY.set(self.active.len() as f64);
        FlushStartOutcome::Started
    }

    /// Records a peer ACK. Returns true when the flush completed and the
    /// FSM went back to the pool.
    pub fn peer_ack(&mut self, key: FlushKey, peer: PeerId) -> bool {
        let Some(fsm) = self.active.get_mut(&key) else {
            debug!(key = key.raw(), "ACK for idle flush key");
            return false;
        };
        fsm.pending.remove(peer);
        if fsm.pending.is_empty() {
            self.complete(key);
            self.counters.completed += 1;
            return true;
        }
        false
    }

    /// A peer went down: implicit ACK on every in-flight flush. Returns
    /// the keys that completed.
    pub fn peer_down(&mut self, peer: PeerId) -> Vec<FlushKey> {
        let mut done = Vec::new();
        for (key, fsm) in self.active.iter_mut() {
            fsm.pending.remove(peer);
            if fsm.pending.is_empty() {
                done.push(*key);
            }
        }
        for key in &done {
            self.complete(*key);
            self.counters.completed += 1;
        }
        done
    }

    /// The ACK-wait timer fired. A timeout is a success from the caller's
    /// perspective; lost ACKs reconcile through peer-down handling.
    pub fn timer_fired(&mut self, key: FlushKey) -> bool {
        if self.active.contains_key(&key) {
            self.complete(key);
            self.counters.timeouts += 1;
            return true;
        }
        false
    }

    /// Abandons every in-flight flush; used on stop and role change.
    pub fn stop(&mut self) {
        let keys: Vec<FlushKey> = self.active.keys().copied().collect();
        for key in keys {
            self.complete(key);
        }
    }

    fn complete(&mut self, key: FlushKey) {
        if let Some(fsm) = self.active.remove(&key) {
            fsm.timer.abort();
            let free = if key.is_port_vid() {
                &mut self.port_vid_free
            } else {
                &mut self.system_free
            };
            *free += 1;
        }
        metrics::FLUSH_FSMS_BUSY.set(self.active.len() as f64);
    }
}
