// src/core/hal/mock.rs

//! A recording HAL used by the test-suite and by simulation runs without
//! switch hardware. Every call is appended to an operation log that tests
//! assert against, and the FDB is modeled as an in-memory table.

use super::{FdbHwEntry, FdbNotification, Hal, NotifyDecision};
use crate::core::errors::MlagError;
use crate::core::protocol::wire::KeyFilter;
use crate::core::types::{MacAddr, PortId, Vid};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// One recorded HAL invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalOp {
    AdminSet { port: PortId, up: bool },
    RedirectSet { port: PortId },
    RedirectClear { port: PortId },
    IsolationSet { port: PortId },
    IsolationClear { port: PortId },
    FdbInstall(Vec<FdbHwEntry>),
    FdbDelete(Vec<(Vid, MacAddr)>),
    FdbFlush(KeyFilter),
}

#[derive(Default)]
pub struct RecordingHal {
    ops: Mutex<Vec<HalOp>>,
    fdb: Mutex<HashMap<(Vid, MacAddr), FdbHwEntry>>,
    notify_tx: Mutex<Option<mpsc::Sender<FdbNotification>>>,
}

impl RecordingHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns the operation log.
    pub fn take_ops(&self) -> Vec<HalOp> {
        std::mem::take(&mut self.ops.lock())
    }

    /// Returns the log without clearing it.
    pub fn ops(&self) -> Vec<HalOp> {
        self.ops.lock().clone()
    }

    /// The last recorded operation touching `port`, for isolation and
    /// redirect assertions.
    pub fn last_port_op(&self, port: PortId) -> Option<HalOp> {
        self.ops
            .lock()
            .iter()
            .rev()
            .find(|op| {
                matches!(op,
                    HalOp::AdminSet { port: p, .. }
                    | HalOp::RedirectSet { port: p }
                    | HalOp::RedirectClear { port: p }
                    | HalOp::IsolationSet { port: p }
                    | HalOp::IsolationClear { port: p } if *p == port)
            })
            .cloned()
    }

    pub fn fdb_entry(&self, vid: Vid, mac: MacAddr) -> Option<FdbHwEntry> {
        self.fdb.lock().get(&(vid, mac)).copied()
    }

    pub fn fdb_len(&self) -> usize {
        self.fdb.lock().len()
    }

    /// Pushes a notification batch through the registered sink and returns
    /// the decisions the service produced. Panics if no sink is registered;
    /// tests always register before injecting.
    pub async fn inject_notification(
        &self,
        records: Vec<super::FdbNotifyRecord>,
    ) -> Vec<NotifyDecision> {
        let tx = self
            .notify_tx
            .lock()
            .clone()
            .expect("no control-learn sink registered");
        let (decisions_tx, decisions_rx) = tokio::sync::oneshot::channel();
        tx.send(FdbNotification {
            records,
            decisions: decisions_tx,
        })
        .await
        .expect("mac-sync service gone");
        decisions_rx.await.expect("no decisions returned")
    }

    pub fn has_sink(&self) -> bool {
        self.notify_tx.lock().is_some()
    }

    fn record(&self, op: HalOp) {
        self.ops.lock().push(op);
    }
}

impl Hal for RecordingHal {
    fn port_admin_set(&self, port: PortId, up: bool) -> Result<(), MlagError> {
        self.record(HalOp::AdminSet { port, up });
        Ok(())
    }

    fn ipl_redirect_set(&self, port: PortId) -> Result<(), MlagError> {
        self.record(HalOp::RedirectSet { port });
        Ok(())
    }

    fn ipl_redirect_clear(&self, port: PortId) -> Result<(), MlagError> {
        self.record(HalOp::RedirectClear { port });
        Ok(())
    }

    fn isolation_set(&self, port: PortId) -> Result<(), MlagError> {
        self.record(HalOp::IsolationSet { port });
        Ok(())
    }

    fn isolation_clear(&self, port: PortId) -> Result<(), MlagError> {
        self.record(HalOp::IsolationClear { port });
        Ok(())
    }

    fn fdb_install(&self, entries: &[FdbHwEntry]) -> Result<(), MlagError> {
        let mut fdb = self.fdb.lock();
        for e in entries {
            fdb.insert((e.vid, e.mac), *e);
        }
        drop(fdb);
        self.record(HalOp::FdbInstall(entries.to_vec()));
        Ok(())
    }

    fn fdb_delete(&self, keys: &[(Vid, MacAddr)]) -> Result<(), MlagError> {
        let mut fdb = self.fdb.lock();
        for key in keys {
            fdb.remove(key);
        }
        drop(fdb);
        self.record(HalOp::FdbDelete(keys.to_vec()));
        Ok(())
    }

    fn fdb_flush(&self, filter: &KeyFilter) -> Result<(), MlagError> {
        let mut fdb = self.fdb.lock();
        fdb.retain(|(vid, _), entry| {
            let vid_match = !filter.by_vid || *vid == filter.vid;
            let port_match = !filter.by_port || entry.port as u32 == filter.port;
            !(vid_match && port_match)
        });
        drop(fdb);
        self.record(HalOp::FdbFlush(*filter));
        Ok(())
    }

    fn fdb_snapshot(&self) -> Vec<FdbHwEntry> {
        let mut entries: Vec<FdbHwEntry> = self.fdb.lock().values().copied().collect();
        entries.sort_by_key(|e| (e.vid, e.mac));
        entries
    }

    fn ctrl_learn_register(&self, sink: mpsc::Sender<FdbNotification>) {
        *self.notify_tx.lock() = Some(sink);
    }

    fn ctrl_learn_unregister(&self) {
        *self.notify_tx.lock() = None;
    }
}
