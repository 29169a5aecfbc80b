// src/core/fdb/mod.rs

//! Distributed FDB synchronization: the master ownership table, the
//! peer-side control-learning glue, and the router-MAC table.

pub mod entry;
pub mod manager;
pub mod master;
pub mod peer;
pub mod router_macs;

pub use entry::{FdbArena, FdbIndex, FdbKey, MasterFdbRecord};
pub use manager::MacSyncService;
pub use master::{FdbMaster, MasterLearnAction};
pub use peer::FdbPeer;
pub use router_macs::{RouterMacAction, RouterMacDb, RouterMacEntry, RouterMacSync};

use std::sync::atomic::{AtomicU64, Ordering};
use strum::EnumCount as _;
use strum_macros::{Display, EnumCount, EnumIter};

/// Per-event-type histogram of the mac-sync subsystem, one slot per
/// variant. Read by the management dump; increments are relaxed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumCount, EnumIter)]
pub enum MacSyncCounter {
    LocalLearned,
    LocalLearnedNew,
    LocalLearnedMigrate,
    LocalLearnedDuringFlush,
    LocalAged,
    WrongLocalAged,
    NotifyLearned,
    NotifyAged,
    GlobalLearned,
    GlobalAged,
    LearnRejectedByMaster,
    LearnDeniedCapacity,
    NotReadyDrop,
    RouterMacConf,
}

#[derive(Debug)]
pub struct MacSyncCounters {
    slots: [AtomicU64; MacSyncCounter::COUNT],
}

impl Default for MacSyncCounters {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

impl MacSyncCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: MacSyncCounter) {
        self.slots[counter as usize].fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: MacSyncCounter, n: u64) {
        self.slots[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: MacSyncCounter) -> u64 {
        self.slots[counter as usize].load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }
}
