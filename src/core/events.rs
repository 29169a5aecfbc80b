// src/core/events.rs

//! Defines the in-process system events and the per-service priority bus
//! that delivers them to a dispatcher.

use crate::core::errors::MlagError;
use crate::core::hal::{FdbHwEntry, FdbNotification};
use crate::core::protocol::wire::{
    MacLearnBatch, PeerPortOperChangePdu, PortGlobalStatePdu, PortListPdu, PortsOperUpdatePdu,
};
use crate::core::types::{MacAddr, PeerId, PeerState, PortId, Role, Vid};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Capacity of each priority queue. High is kept small; it carries only
/// Deinit and timer pulses, and backpressure there is a bug.
const HIGH_QUEUE_CAPACITY: usize = 64;
const MEDIUM_QUEUE_CAPACITY: usize = 1024;
const LOW_QUEUE_CAPACITY: usize = 4096;

/// Queue level for a posted event. Within one level delivery is FIFO;
/// between levels the dispatcher drains strictly high-before-low whenever it
/// picks its next unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Every in-process event a dispatcher can receive. Wire PDUs do not pass
/// through here; they arrive on the session receivers registered by the
/// comm wrapper, and both routes share the same opcode table.
#[derive(Debug, Clone)]
pub enum SystemEvent {
    /// Master verdict applied to the local stack (same body as the PDU).
    PortGlobalState(PortGlobalStatePdu),
    PortsSyncData(PortListPdu),
    PortsSyncFinish { peer_id: PeerId },
    PortsUpdate(PortListPdu),
    PortsOperUpdate(PortsOperUpdatePdu),
    PortsOperSyncDone { peer_id: PeerId },
    PeerPortOperChange(PeerPortOperChangePdu),
    PeerStateChange { peer_id: PeerId, state: PeerState },
    PeerStart { peer_id: PeerId },
    PeerEnable { peer_id: PeerId },
    PeerSyncDone { peer_id: PeerId },
    StopDone,
    /// Local link transition reported by the HAL for one of our ports.
    PortOperChange { port_id: PortId, up: bool },
    /// Completion of a port configure/delete request, surfaced to the
    /// management caller.
    PortDeleted { port_id: PortId, success: bool },
    /// Router interface MAC configured or removed on this node.
    RouterMacCfg { vid: Vid, mac: MacAddr, add: bool },
    IplPortSet { port_id: PortId },
    MasterElectionSwitchStatusChange { new_role: Role },
    /// A session went up or down; posted by the comm wrapper.
    ConnNotify { peer_id: PeerId, up: bool },
    /// The reconnect timer fired; re-invoke `start` on the wrapper.
    Reconnect,
    /// A flush FSM ACK-wait timer expired.
    FlushFsmTimer { key: u64 },
    /// Aged entries staged by the notification path, to be re-installed as
    /// non-ageable before the LocalAge PDU goes out.
    InternalAge { entries: Vec<FdbHwEntry> },
    /// A control-learning notification batch marshalled off the HAL
    /// thread. The payload is taken out exactly once by the handler.
    CtrlLearnNotify(Arc<Mutex<Option<FdbNotification>>>),
    /// A global learn applied locally (loopback of the master broadcast on
    /// the master's own node).
    MacGlobalLearnLocal(MacLearnBatch),
    Deinit,
}

impl SystemEvent {
    /// Short name for dispatcher logging.
    pub fn name(&self) -> &'static str {
        match self {
            SystemEvent::PortGlobalState(_) => "PORT_GLOBAL_STATE",
            SystemEvent::PortsSyncData(_) => "PORTS_SYNC_DATA",
            SystemEvent::PortsSyncFinish { .. } => "PORTS_SYNC_FINISH",
            SystemEvent::PortsUpdate(_) => "PORTS_UPDATE",
            SystemEvent::PortsOperUpdate(_) => "PORTS_OPER_UPDATE",
            SystemEvent::PortsOperSyncDone { .. } => "PORTS_OPER_SYNC_DONE",
            SystemEvent::PeerPortOperChange(_) => "PEER_PORT_OPER_CHANGE",
            SystemEvent::PeerStateChange { .. } => "PEER_STATE_CHANGE",
            SystemEvent::PeerStart { .. } => "PEER_START",
            SystemEvent::PeerEnable { .. } => "PEER_ENABLE",
            SystemEvent::PeerSyncDone { .. } => "PEER_SYNC_DONE",
            SystemEvent::StopDone => "STOP_DONE",
            SystemEvent::PortOperChange { .. } => "PORT_OPER_CHANGE",
            SystemEvent::PortDeleted { .. } => "PORT_DELETED",
            SystemEvent::RouterMacCfg { .. } => "ROUTER_MAC_CFG",
            SystemEvent::IplPortSet { .. } => "IPL_PORT_SET",
            SystemEvent::MasterElectionSwitchStatusChange { .. } => "SWITCH_STATUS_CHANGE",
            SystemEvent::ConnNotify { .. } => "CONN_NOTIFY",
            SystemEvent::Reconnect => "RECONNECT",
            SystemEvent::FlushFsmTimer { .. } => "FLUSH_FSM_TIMER",
            SystemEvent::InternalAge { .. } => "INTERNAL_AGE",
            SystemEvent::CtrlLearnNotify(_) => "CTRL_LEARN_NOTIFY",
            SystemEvent::MacGlobalLearnLocal(_) => "MAC_GLOBAL_LEARN_LOCAL",
            SystemEvent::Deinit => "DEINIT",
        }
    }
}

/// The sending half of a service's priority bus. Cheap to clone; every
/// module that needs to post events holds one.
#[derive(Debug, Clone)]
pub struct EventBus {
    high_tx: mpsc::Sender<SystemEvent>,
    medium_tx: mpsc::Sender<SystemEvent>,
    low_tx: mpsc::Sender<SystemEvent>,
}

/// The receiving half, consumed by exactly one dispatcher loop.
#[derive(Debug)]
pub struct EventQueues {
    pub high_rx: mpsc::Receiver<SystemEvent>,
    pub medium_rx: mpsc::Receiver<SystemEvent>,
    pub low_rx: mpsc::Receiver<SystemEvent>,
}

impl EventBus {
    pub fn new() -> (EventBus, EventQueues) {
        let (high_tx, high_rx) = mpsc::channel(HIGH_QUEUE_CAPACITY);
        let (medium_tx, medium_rx) = mpsc::channel(MEDIUM_QUEUE_CAPACITY);
        let (low_tx, low_rx) = mpsc::channel(LOW_QUEUE_CAPACITY);
        (
            EventBus {
                high_tx,
                medium_tx,
                low_tx,
            },
            EventQueues {
                high_rx,
                medium_rx,
                low_rx,
            },
        )
    }

    /// Posts an event, waiting if the queue is momentarily full. Returns
    /// `Cancelled` once the dispatcher has gone away, which callers treat
    /// the same way handlers treat a deinit.
    pub async fn post(&self, priority: Priority, event: SystemEvent) -> Result<(), MlagError> {
        debug!(event = event.name(), ?priority, "posting system event");
        let tx = match priority {
            Priority::High => &self.high_tx,
            Priority::Medium => &self.medium_tx,
            Priority::Low => &self.low_tx,
        };
        tx.send(event).await.map_err(|_| MlagError::Cancelled)
    }

    /// Fire-and-forget post from synchronous context (HAL callbacks, timer
    /// tasks). A full queue drops the event; every caller of this variant
    /// tolerates loss.
    pub fn post_nowait(&self, priority: Priority, event: SystemEvent) {
        let tx = match priority {
            Priority::High => &self.high_tx,
            Priority::Medium => &self.medium_tx,
            Priority::Low => &self.low_tx,
        };
        if let Err(e) = tx.try_send(event) {
            debug!("event dropped: {e}");
        }
    }
}
