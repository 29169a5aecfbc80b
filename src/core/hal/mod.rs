// src/core/hal/mod.rs

//! The hardware abstraction seam.
//!
//! Everything below this trait belongs to the platform: port admin state,
//! IPL redirect and isolation, FDB programming, and the control-learning
//! notification stream. The control plane only ever talks to `dyn Hal`,
//! which is what makes the FSMs and the sync logic testable against a
//! recording mock.

pub mod mock;

use crate::core::errors::MlagError;
use crate::core::protocol::wire::KeyFilter;
use crate::core::types::{FdbEntryType, MacAddr, PortId, Vid};
use tokio::sync::{mpsc, oneshot};

/// One entry as programmed into (or reported by) the hardware FDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdbHwEntry {
    pub vid: Vid,
    pub mac: MacAddr,
    pub port: PortId,
    pub entry_type: FdbEntryType,
}

/// One record inside a control-learning notification batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdbNotifyRecord {
    Learn {
        vid: Vid,
        mac: MacAddr,
        port: PortId,
        entry_type: FdbEntryType,
    },
    Age {
        vid: Vid,
        mac: MacAddr,
        port: PortId,
    },
    FlushAll,
    FlushVid {
        vid: Vid,
    },
    FlushPort {
        port: PortId,
    },
    FlushPortVid {
        port: PortId,
        vid: Vid,
    },
}

/// Per-record verdict returned to the control-learning library. The library
/// commits approved records to hardware and discards denied ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    Approve,
    Deny,
}

/// A notification batch marshalled from the HAL thread into the mac-sync
/// dispatcher. The library blocks on `decisions` until the service has
/// shaped the approved list.
#[derive(Debug)]
pub struct FdbNotification {
    pub records: Vec<FdbNotifyRecord>,
    pub decisions: oneshot::Sender<Vec<NotifyDecision>>,
}

/// The platform capability surface consumed by the control plane.
pub trait Hal: Send + Sync {
    /// Admin-enables or disables a port at the HAL.
    fn port_admin_set(&self, port: PortId, up: bool) -> Result<(), MlagError>;

    /// Installs the IPL redirect: local ingress traffic for `port` is
    /// rerouted across the IPL to the remote peer.
    fn ipl_redirect_set(&self, port: PortId) -> Result<(), MlagError>;

    fn ipl_redirect_clear(&self, port: PortId) -> Result<(), MlagError>;

    /// Isolates `port` from the IPL: traffic arriving on the IPL must not
    /// egress through it. Asserted whenever every remote peer can forward.
    fn isolation_set(&self, port: PortId) -> Result<(), MlagError>;

    fn isolation_clear(&self, port: PortId) -> Result<(), MlagError>;

    /// Bulk-programs FDB entries.
    fn fdb_install(&self, entries: &[FdbHwEntry]) -> Result<(), MlagError>;

    /// Bulk-deletes FDB entries by key.
    fn fdb_delete(&self, keys: &[(Vid, MacAddr)]) -> Result<(), MlagError>;

    /// Executes a hardware flush over the given scope.
    fn fdb_flush(&self, filter: &KeyFilter) -> Result<(), MlagError>;

    /// Snapshots the hardware FDB under the control-learning library's own
    /// lock, so the caller sees a consistent table.
    fn fdb_snapshot(&self) -> Vec<FdbHwEntry>;

    /// Registers the notification sink. The library pushes every batch into
    /// the channel and waits on the per-batch decision reply.
    fn ctrl_learn_register(&self, sink: mpsc::Sender<FdbNotification>);

    fn ctrl_learn_unregister(&self);
}
