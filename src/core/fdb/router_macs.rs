// src/core/fdb/router_macs.rs

//! The router-MAC table: MACs of router interfaces on this node, synced to
//! the master as static learns and tracked separately from dynamically
//! learned MACs so a global age never silently removes a live router MAC.

use crate::core::errors::MlagError;
use crate::core::fdb::entry::FdbKey;
use crate::core::protocol::wire::{MacAgeEntry, MacLearnEntry};
use crate::core::types::{FdbEntryType, MacAddr, NON_MLAG_PORT, PeerId, Vid};
use indexmap::IndexMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMacAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy)]
pub struct RouterMacEntry {
    pub vid: Vid,
    pub mac: MacAddr,
    pub last_action: RouterMacAction,
    /// Whether the last action has been pushed to the master.
    pub synced: bool,
}

pub struct RouterMacDb {
    entries: IndexMap<FdbKey, RouterMacEntry>,
    capacity: usize,
    local_peer: PeerId,
}

impl RouterMacDb {
    pub fn new(capacity: usize, local_peer: PeerId) -> Self {
        Self {
            entries: IndexMap::new(),
            capacity,
            local_peer,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, vid: Vid, mac: MacAddr) -> bool {
        self.entries.contains_key(&(vid, mac))
    }

    /// Applies a router-MAC configuration change. Returns the learn or age
    /// to stage toward the master, if any.
    pub fn configure(
        &mut self,
        vid: Vid,
        mac: MacAddr,
        add: bool,
    ) -> Result<Option<RouterMacSync>, MlagError> {
        let key = (vid, mac);
        if add {
            if let Some(existing) = self.entries.get_mut(&key) {
                existing.last_action = RouterMacAction::Add;
                existing.synced = false;
            } else {
                if self.entries.len() >= self.capacity {
                    return Err(MlagError::Capacity("router mac table"));
                }
                self.entries.insert(
                    key,
                    RouterMacEntry {
                        vid,
                        mac,
                        last_action: RouterMacAction::Add,
                        synced: false,
                    },
                );
            }
            Ok(Some(RouterMacSync::Learn(self.to_learn(vid, mac))))
        } else {
            let Some(existing) = self.entries.get_mut(&key) else {
                return Err(MlagError::NotFound(format!("router mac {mac} vid {vid}")));
            };
            existing.last_action = RouterMacAction::Remove;
            existing.synced = false;
            Ok(Some(RouterMacSync::Age(MacAgeEntry {
                vid,
                mac,
                originator: self.local_peer,
            })))
        }
    }

    /// Marks an entry as pushed; removed entries leave the table once the
    /// removal is synced.
    pub fn mark_synced(&mut self, vid: Vid, mac: MacAddr) {
        let key = (vid, mac);
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.synced = true;
        if entry.last_action == RouterMacAction::Remove {
            self.entries.swap_remove(&key);
        }
    }

    /// Everything that still needs pushing; resent on peer (re)sync.
    pub fn unsynced(&self) -> Vec<RouterMacSync> {
        self.entries
            .values()
            .filter(|e| !e.synced)
            .map(|e| match e.last_action {
                RouterMacAction::Add => RouterMacSync::Learn(self.to_learn(e.vid, e.mac)),
                RouterMacAction::Remove => RouterMacSync::Age(MacAgeEntry {
                    vid: e.vid,
                    mac: e.mac,
                    originator: self.local_peer,
                }),
            })
            .collect()
    }

    /// Called when a GlobalAge removed this key from the hardware. A MAC
    /// whose last action was Add is still wanted; return the learn that
    /// re-stages it.
    pub fn on_global_age(&mut self, vid: Vid, mac: MacAddr) -> Option<MacLearnEntry> {
        let entry = self.entries.get_mut(&(vid, mac))?;
        if entry.last_action == RouterMacAction::Add {
            debug!(%mac, vid, "router mac aged out, re-staging");
            entry.synced = false;
            Some(self.to_learn(vid, mac))
        } else {
            None
        }
    }

    /// Drops everything whose sync state no longer means anything, used on
    /// role change. Configured MACs stay, flagged for re-push.
    pub fn reset_sync(&mut self) {
        for entry in self.entries.values_mut() {
            entry.synced = false;
        }
    }

    fn to_learn(&self, vid: Vid, mac: MacAddr) -> MacLearnEntry {
        MacLearnEntry {
            vid,
            mac,
            port: NON_MLAG_PORT,
            entry_type: FdbEntryType::Static,
            port_cookie: 0,
            originator: self.local_peer,
        }
    }
}

/// One staged router-MAC push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterMacSync {
    Learn(MacLearnEntry),
    Age(MacAgeEntry),
}
