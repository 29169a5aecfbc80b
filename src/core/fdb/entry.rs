// src/core/fdb/entry.rs

//! The master's per-(vid, mac) ownership records, stored in a dense arena
//! with explicit indices. The arena index is what other tables hold instead
//! of pointers; freeing is explicit at master transitions.

use crate::core::errors::MlagError;
use crate::core::types::{FdbEntryType, MacAddr, PeerSet, Vid};
use indexmap::IndexMap;

pub type FdbKey = (Vid, MacAddr);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FdbIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterFdbRecord {
    pub vid: Vid,
    pub mac: MacAddr,
    /// Wire port id, or the non-MLAG sentinel.
    pub port: u32,
    pub entry_type: FdbEntryType,
    /// Peers that have locally learned this MAC. For a dynamic entry,
    /// non-empty iff the entry is installed on some peer's hardware.
    pub owners: PeerSet,
    /// Wall second of the most recent owner change; migration debounce.
    pub timestamp: u64,
    /// True port id preserved for non-MLAG learns.
    pub port_cookie: u32,
}

impl MasterFdbRecord {
    pub fn key(&self) -> FdbKey {
        (self.vid, self.mac)
    }
}

/// Dense record pool plus key index. Bounded by the configured table
/// capacity; exhaustion surfaces as `Capacity` and becomes a deny decision
/// on the notification path.
pub struct FdbArena {
    slots: Vec<Option<MasterFdbRecord>>,
    free: Vec<FdbIndex>,
    index: IndexMap<FdbKey, FdbIndex>,
    capacity: usize,
}

impl FdbArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: IndexMap::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.capacity - self.index.len()
    }

    pub fn get(&self, key: FdbKey) -> Option<(FdbIndex, &MasterFdbRecord)> {
        let idx = *self.index.get(&key)?;
        self.slots[idx.0 as usize].as_ref().map(|r| (idx, r))
    }

    pub fn get_mut(&mut self, key: FdbKey) -> Option<(FdbIndex, &mut MasterFdbRecord)> {
        let idx = *self.index.get(&key)?;
        self.slots[idx.0 as usize].as_mut().map(|r| (idx, r))
    }

    pub fn by_index(&self, idx: FdbIndex) -> Option<&MasterFdbRecord> {
        self.slots.get(idx.0 as usize)?.as_ref()
    }

    pub fn insert(&mut self, record: MasterFdbRecord) -> Result<FdbIndex, MlagError> {
        let key = record.key();
        if let Some((idx, slot)) = self.get_mut(key) {
            *slot = record;
            return Ok(idx);
        }
        if self.index.len() >= self.capacity {
            return Err(MlagError::Capacity("fdb table"));
        }
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx.0 as usize] = Some(record);
                idx
            }
            None => {
                let idx = FdbIndex(self.slots.len() as u32);
                self.slots.push(Some(record));
                idx
            }
        };
        self.index.insert(key, idx);
        Ok(idx)
    }

    pub fn remove(&mut self, key: FdbKey) -> Option<MasterFdbRecord> {
        let idx = self.index.swap_remove(&key)?;
        let record = self.slots[idx.0 as usize].take();
        self.free.push(idx);
        record
    }

    /// Iterates records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &MasterFdbRecord> {
        self.index
            .values()
            .filter_map(|idx| self.slots[idx.0 as usize].as_ref())
    }

    pub fn keys(&self) -> Vec<FdbKey> {
        self.index.keys().copied().collect()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
    }
}
