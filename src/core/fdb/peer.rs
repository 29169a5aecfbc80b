// src/core/fdb/peer.rs

//! Peer-side FDB glue: shapes the control-learning library's notification
//! batches into approve/deny decisions plus staged PDUs, and applies the
//! master's global learns, ages and flushes to the hardware.

use crate::core::errors::MlagError;
use crate::core::fdb::router_macs::RouterMacDb;
use crate::core::fdb::{MacSyncCounter, MacSyncCounters};
use crate::core::flush::FlushKey;
use crate::core::hal::{FdbHwEntry, FdbNotifyRecord, Hal, NotifyDecision};
use crate::core::port::PortDb;
use crate::core::protocol::wire::{
    FlushAckPdu, FlushRequestPdu, KeyFilter, MacAgeEntry, MacLearnEntry,
};
use crate::core::types::{FdbEntryType, MacAddr, NON_MLAG_PORT, PeerId, PortId, Vid};
use std::sync::Arc;
use tracing::warn;

/// Work produced while shaping one notification batch, performed by the
/// mac-sync service after the decisions are returned to the library.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerAction {
    /// Stage a LocalLearn batch toward the master.
    SendLocalLearn(Vec<MacLearnEntry>),
    /// Re-install aged entries as non-ageable, then send LocalAge.
    InternalAge(Vec<FdbHwEntry>),
    /// A hardware-originated flush translated to a peer FlushStart.
    SendFlushStart(FlushRequestPdu),
}

pub struct FdbPeer {
    local_peer: PeerId,
    ipl_port: Option<PortId>,
    port_db: Arc<PortDb>,
    counters: Arc<MacSyncCounters>,
    batch_max: usize,
    sync_done: bool,
}

impl FdbPeer {
    pub fn new(
        local_peer: PeerId,
        ipl_port: Option<PortId>,
        port_db: Arc<PortDb>,
        counters: Arc<MacSyncCounters>,
        batch_max: usize,
    ) -> Self {
        Self {
            local_peer,
            ipl_port,
            port_db,
            counters,
            batch_max,
            sync_done: false,
        }
    }

    pub fn set_sync_done(&mut self, done: bool) {
        self.sync_done = done;
    }

    pub fn sync_done(&self) -> bool {
        self.sync_done
    }

    pub fn set_ipl_port(&mut self, port: Option<PortId>) {
        self.ipl_port = port;
    }

    /// Shapes one notification batch into per-record decisions and staged
    /// work. `master_free` carries the master's free-record count when the
    /// master is colocated; learn records beyond it are denied outright.
    pub fn handle_notification(
        &mut self,
        records: &[FdbNotifyRecord],
        master_free: Option<usize>,
        hal: &dyn Hal,
    ) -> (Vec<NotifyDecision>, Vec<PeerAction>) {
        let mut decisions = Vec::with_capacity(records.len());
        let mut actions = Vec::new();

        if !self.sync_done {
            // Nothing is forwarded before peer sync concludes.
            self.counters
                .add(MacSyncCounter::NotReadyDrop, records.len() as u64);
            decisions.resize(records.len(), NotifyDecision::Deny);
            return (decisions, actions);
        }

        let mut learn_budget = master_free.unwrap_or(usize::MAX);
        let mut staged_learns: Vec<MacLearnEntry> = Vec::new();
        let mut staged_ages: Vec<FdbHwEntry> = Vec::new();

        for record in records {
            match *record {
                FdbNotifyRecord::Learn {
                    vid,
                    mac,
                    port,
                    entry_type,
                } => {
                    self.counters.inc(MacSyncCounter::NotifyLearned);
                    if learn_budget == 0 {
                        self.counters.inc(MacSyncCounter::LearnDeniedCapacity);
                        crate::core::metrics::LEARN_DENIES_TOTAL.inc();
                        decisions.push(NotifyDecision::Deny);
                        continue;
                    }
                    learn_budget -= 1;

                    let is_mlag = self.port_db.exists(port);
                    if entry_type.is_static() && is_mlag {
                        // Statics on MLAG ports commit directly, no IBC.
                        decisions.push(NotifyDecision::Approve);
                        continue;
                    }
                    decisions.push(NotifyDecision::Deny);
                    staged_learns.push(MacLearnEntry {
                        vid,
                        mac,
                        port: if is_mlag { port as u32 } else { NON_MLAG_PORT },
                        entry_type,
                        port_cookie: if is_mlag { 0 } else { port as u32 },
                        originator: self.local_peer,
                    });
                    if staged_learns.len() >= self.batch_max {
                        actions.push(PeerAction::SendLocalLearn(std::mem::take(
                            &mut staged_learns,
                        )));
                    }
                }
                FdbNotifyRecord::Age { vid, mac, port } => {
                    self.counters.inc(MacSyncCounter::NotifyAged);
                    decisions.push(NotifyDecision::Deny);
                    staged_ages.push(FdbHwEntry {
                        vid,
                        mac,
                        port,
                        entry_type: FdbEntryType::DynamicNonAgeable,
                    });
                }
                FdbNotifyRecord::FlushAll => {
                    decisions.push(NotifyDecision::Deny);
                    actions.push(PeerAction::SendFlushStart(self.flush_request(
                        None,
                        None,
                        hal,
                    )));
                }
                FdbNotifyRecord::FlushVid { vid } => {
                    decisions.push(NotifyDecision::Deny);
                    actions.push(PeerAction::SendFlushStart(self.flush_request(
                        Some(vid),
                        None,
                        hal,
                    )));
                }
                FdbNotifyRecord::FlushPort { port } => {
                    decisions.push(NotifyDecision::Deny);
                    actions.push(PeerAction::SendFlushStart(self.flush_request(
                        None,
                        Some(port),
                        hal,
                    )));
                }
                FdbNotifyRecord::FlushPortVid { port, vid } => {
                    decisions.push(NotifyDecision::Deny);
                    actions.push(PeerAction::SendFlushStart(self.flush_request(
                        Some(vid),
                        Some(port),
                        hal,
                    )));
                }
            }
        }

        if !staged_learns.is_empty() {
            actions.push(PeerAction::SendLocalLearn(staged_learns));
        }
        if !staged_ages.is_empty() {
            actions.push(PeerAction::InternalAge(staged_ages));
        }
        (decisions, actions)
    }

    /// Builds a peer-originated FlushStart. Non-MLAG-port flushes pack the
    /// current dynamic FDB slice so the remote peer can delete entries it
    /// cannot match by port.
    fn flush_request(
        &self,
        vid: Option<Vid>,
        port: Option<PortId>,
        hal: &dyn Hal,
    ) -> FlushRequestPdu {
        let non_mlag = port.map(|p| !self.port_db.exists(p)).unwrap_or(false);
        let filter = KeyFilter {
            by_vid: vid.is_some(),
            by_port: port.is_some(),
            vid: vid.unwrap_or(0),
            port: port.map(|p| p as u32).unwrap_or(0),
        };
        let macs = if non_mlag {
            hal.fdb_snapshot()
                .into_iter()
                .filter(|e| {
                    e.entry_type.is_dynamic()
                        && Some(e.port) == port
                        && vid.is_none_or(|v| v == e.vid)
                })
                .map(|e| (e.vid, e.mac))
                .collect()
        } else {
            Vec::new()
        };
        FlushRequestPdu {
            filter,
            origin_peer: self.local_peer,
            non_mlag,
            macs,
        }
    }

    /// Applies a GlobalLearn batch to the hardware: restores the true port
    /// for our own non-MLAG learns, redirects remote non-MLAG learns to the
    /// IPL, and maps entry types so only self-owned entries age locally.
    pub fn apply_global_learn(&mut self, entries: &[MacLearnEntry], hal: &dyn Hal) -> Result<(), MlagError> {
        let mut hw = Vec::with_capacity(entries.len());
        for e in entries {
            let port: PortId = if e.port == NON_MLAG_PORT {
                if e.originator == self.local_peer {
                    e.port_cookie as PortId
                } else {
                    match self.ipl_port {
                        Some(ipl) => ipl,
                        None => {
                            warn!(mac = %e.mac, "no IPL port for remote non-MLAG learn");
                            continue;
                        }
                    }
                }
            } else {
                e.port as PortId
            };
            let entry_type = if e.entry_type.is_static() {
                FdbEntryType::Static
            } else if e.originator == self.local_peer {
                FdbEntryType::DynamicAgeable
            } else {
                FdbEntryType::DynamicNonAgeable
            };
            hw.push(FdbHwEntry {
                vid: e.vid,
                mac: e.mac,
                port,
                entry_type,
            });
        }
        self.counters
            .add(MacSyncCounter::GlobalLearned, hw.len() as u64);
        hal.fdb_install(&hw)
    }

    /// Applies a GlobalAge batch. Router MACs whose last action is Add are
    /// re-staged; the returned learns go back to the master.
    pub fn apply_global_age(
        &mut self,
        entries: &[MacAgeEntry],
        hal: &dyn Hal,
        router_macs: &mut RouterMacDb,
    ) -> Result<Vec<MacLearnEntry>, MlagError> {
        let keys: Vec<(Vid, MacAddr)> = entries.iter().map(|e| (e.vid, e.mac)).collect();
        hal.fdb_delete(&keys)?;
        self.counters
            .add(MacSyncCounter::GlobalAged, keys.len() as u64);
        let mut restaged = Vec::new();
        for (vid, mac) in keys {
            if let Some(learn) = router_macs.on_global_age(vid, mac) {
                restaged.push(learn);
            }
        }
        Ok(restaged)
    }

    /// Executes a master-ordered flush and produces the ACK echoing the
    /// flush key.
    pub fn execute_master_flush(
        &mut self,
        req: &FlushRequestPdu,
        hal: &dyn Hal,
    ) -> Result<FlushAckPdu, MlagError> {
        if req.non_mlag && req.origin_peer != self.local_peer {
            // The flushed port only exists on the origin peer; delete the
            // delivered entries individually.
            hal.fdb_delete(&req.macs)?;
        } else {
            hal.fdb_flush(&req.filter)?;
        }
        let key = FlushKey::from_request(&req.filter, req.origin_peer, req.non_mlag);
        Ok(FlushAckPdu {
            key: key.raw(),
            peer_id: self.local_peer,
        })
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn ipl_port(&self) -> Option<PortId> {
        self.ipl_port
    }
}
