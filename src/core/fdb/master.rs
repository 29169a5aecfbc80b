// src/core/fdb/master.rs

//! Master-side FDB ownership logic: local-learn admission, migration
//! debounce, aging aggregation, peer-down sweeps and the full-table export.
//!
//! The functions here are pure over the arena; PDU emission is described by
//! the returned actions and performed by the mac-sync service.

use crate::core::fdb::entry::{FdbArena, MasterFdbRecord};
use crate::core::fdb::{MacSyncCounter, MacSyncCounters};
use crate::core::metrics;
use crate::core::protocol::wire::{MacAgeEntry, MacLearnEntry};
use crate::core::types::{FdbEntryType, NON_MLAG_PORT, PeerId, PeerSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// How an accepted local learn propagates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterLearnAction {
    /// GlobalLearn to every enabled peer.
    Broadcast(MacLearnEntry),
    /// GlobalLearn to every enabled peer except the originator, which
    /// already holds the entry.
    BroadcastExceptOrigin(MacLearnEntry),
    /// GlobalLearn to the originator alone: the MAC is already owned, the
    /// peer only learns that its copy is ours.
    ToOriginator(MacLearnEntry),
}

pub struct FdbMaster {
    arena: FdbArena,
    debounce_secs: u64,
    counters: Arc<MacSyncCounters>,
}

impl FdbMaster {
    pub fn new(capacity: usize, debounce_secs: u64, counters: Arc<MacSyncCounters>) -> Self {
        Self {
            arena: FdbArena::new(capacity),
            debounce_secs,
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.arena.free_count()
    }

    pub fn record(&self, vid: u16, mac: crate::core::types::MacAddr) -> Option<&MasterFdbRecord> {
        self.arena.get((vid, mac)).map(|(_, r)| r)
    }

    /// Admission of one local learn from `entry.originator`.
    ///
    /// `flush_busy` answers whether an in-flight flush covers the learn's
    /// (vid, port, origin-class); such learns are dropped silently.
    pub fn process_local_learn(
        &mut self,
        entry: &MacLearnEntry,
        now_secs: u64,
        flush_busy: impl Fn(u16, u32, u8) -> bool,
    ) -> Option<MasterLearnAction> {
        self.counters.inc(MacSyncCounter::LocalLearned);
        let origin = entry.originator;

        let match_port = if entry.port == NON_MLAG_PORT {
            entry.port_cookie
        } else {
            entry.port
        };
        let origin_class = if entry.port == NON_MLAG_PORT {
            origin | 0x8
        } else {
            0
        };
        if flush_busy(entry.vid, match_port, origin_class) {
            self.counters.inc(MacSyncCounter::LocalLearnedDuringFlush);
            return None;
        }

        let key = (entry.vid, entry.mac);
        if let Some((_, record)) = self.arena.get_mut(key) {
            return match (record.entry_type.is_static(), entry.entry_type.is_static()) {
                // Dynamic-to-static upgrade is always accepted.
                (false, true) => {
                    record.entry_type = entry.entry_type;
                    record.port = entry.port;
                    record.port_cookie = entry.port_cookie;
                    record.owners = PeerSet::single(origin);
                    record.timestamp = now_secs;
                    Some(MasterLearnAction::Broadcast(Self::to_wire(record, origin)))
                }
                // Static-to-dynamic is always rejected.
                (true, false) => {
                    self.counters.inc(MacSyncCounter::LearnRejectedByMaster);
                    None
                }
                _ => {
                    if record.port == entry.port {
                        // Same port, possibly a new owner.
                        if record.owners.contains(origin) {
                            debug!(vid = entry.vid, mac = %entry.mac, "duplicate local learn");
                            return None;
                        }
                        record.owners.insert(origin);
                        record.timestamp = now_secs;
                        Some(MasterLearnAction::ToOriginator(Self::to_wire(record, origin)))
                    } else {
                        // Migration: debounced at wall-second granularity.
                        if now_secs.saturating_sub(record.timestamp) < self.debounce_secs {
                            self.counters.inc(MacSyncCounter::LocalLearnedMigrate);
                            return None;
                        }
                        record.port = entry.port;
                        record.port_cookie = entry.port_cookie;
                        record.owners = PeerSet::single(origin);
                        record.timestamp = now_secs;
                        Some(MasterLearnAction::Broadcast(Self::to_wire(record, origin)))
                    }
                }
            };
        }

        // New record.
        self.counters.inc(MacSyncCounter::LocalLearnedNew);
        let record = MasterFdbRecord {
            vid: entry.vid,
            mac: entry.mac,
            port: entry.port,
            entry_type: entry.entry_type,
            owners: PeerSet::single(origin),
            timestamp: now_secs,
            port_cookie: entry.port_cookie,
        };
        match self.arena.insert(record) {
            Ok(_) => {
                metrics::FDB_ENTRIES.set(self.arena.len() as f64);
                Some(MasterLearnAction::BroadcastExceptOrigin(Self::to_wire(
                    &record, origin,
                )))
            }
            Err(_) => {
                warn!(vid = entry.vid, mac = %entry.mac, "fdb table full, learn dropped");
                self.counters.inc(MacSyncCounter::LearnDeniedCapacity);
                metrics::LEARN_DENIES_TOTAL.inc();
                None
            }
        }
    }

    /// One local age from `entry.originator`: clears the origin's owner
    /// bit; when the owner set empties the record is freed and a GlobalAge
    /// goes out to every enabled peer.
    pub fn process_local_age(&mut self, entry: &MacAgeEntry) -> Option<MacAgeEntry> {
        self.counters.inc(MacSyncCounter::LocalAged);
        let key = (entry.vid, entry.mac);
        let Some((_, record)) = self.arena.get_mut(key) else {
            self.counters.inc(MacSyncCounter::WrongLocalAged);
            return None;
        };
        if !record.owners.contains(entry.originator) {
            self.counters.inc(MacSyncCounter::WrongLocalAged);
            return None;
        }
        record.owners.remove(entry.originator);
        if record.owners.is_empty() {
            self.arena.remove(key);
            metrics::FDB_ENTRIES.set(self.arena.len() as f64);
            Some(*entry)
        } else {
            None
        }
    }

    /// A peer dropped out. Every dynamic entry it owned is aged on its
    /// behalf; static entries on the IPL are deleted. Other statics
    /// survive. Returns the GlobalAge batch for freed records.
    pub fn peer_down(&mut self, peer: PeerId, ipl_port: Option<u32>) -> Vec<MacAgeEntry> {
        let mut aged = Vec::new();
        for key in self.arena.keys() {
            let Some((_, record)) = self.arena.get_mut(key) else {
                continue;
            };
            if record.entry_type.is_dynamic() {
                if record.owners.contains(peer) {
                    record.owners.remove(peer);
                    if record.owners.is_empty() {
                        let (vid, mac) = key;
                        aged.push(MacAgeEntry {
                            vid,
                            mac,
                            originator: peer,
                        });
                        self.arena.remove(key);
                    }
                }
            } else if Some(record.port) == ipl_port || record.port == NON_MLAG_PORT {
                // Statics learned across the IPL follow their peer.
                if record.owners.contains(peer) {
                    record.owners.remove(peer);
                    if record.owners.is_empty() {
                        let (vid, mac) = key;
                        aged.push(MacAgeEntry {
                            vid,
                            mac,
                            originator: peer,
                        });
                        self.arena.remove(key);
                    }
                }
            }
        }
        metrics::FDB_ENTRIES.set(self.arena.len() as f64);
        aged
    }

    /// Snapshot of the whole table as one learn batch, for the peer-sync
    /// export. Router MACs are already plain static records here.
    pub fn export(&self) -> Vec<MacLearnEntry> {
        self.arena
            .iter()
            .map(|record| {
                let originator = record.owners.iter().next().unwrap_or(0);
                Self::to_wire(record, originator)
            })
            .collect()
    }

    /// Flushes master records matching a completed flush scope.
    pub fn apply_flush(&mut self, vid_filter: Option<u16>, port_filter: Option<u32>) {
        let keys = self.arena.keys();
        for key in keys {
            let Some((_, record)) = self.arena.get(key) else {
                continue;
            };
            if record.entry_type.is_static() {
                continue;
            }
            let match_port = if record.port == NON_MLAG_PORT {
                record.port_cookie
            } else {
                record.port
            };
            let vid_ok = vid_filter.is_none_or(|v| v == record.vid);
            let port_ok = port_filter.is_none_or(|p| p == match_port);
            if vid_ok && port_ok {
                self.arena.remove(key);
            }
        }
        metrics::FDB_ENTRIES.set(self.arena.len() as f64);
    }

    pub fn clear(&mut self) {
        self.arena.clear();
        metrics::FDB_ENTRIES.set(0.0);
    }

    fn to_wire(record: &MasterFdbRecord, originator: PeerId) -> MacLearnEntry {
        MacLearnEntry {
            vid: record.vid,
            mac: record.mac,
            port: record.port,
            entry_type: record.entry_type,
            port_cookie: record.port_cookie,
            originator,
        }
    }
}
