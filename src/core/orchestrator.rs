// src/core/orchestrator.rs

//! Wires the services together and owns the daemon lifecycle: start, role
//! change, peer start, stop, and the management entry points that feed
//! events into the dispatchers.

use crate::config::Config;
use crate::core::comm::{CommWrapper, SocketProtection};
use crate::core::dispatcher;
use crate::core::errors::MlagError;
use crate::core::events::{Priority, SystemEvent};
use crate::core::fdb::{MacSyncCounters, MacSyncService};
use crate::core::hal::Hal;
use crate::core::port::PortManagerService;
use crate::core::protocol::wire::{KeyFilter, PortListPdu};
use crate::core::state::{MlagInit, MlagState};
use crate::core::types::{MacAddr, PeerId, PortId, Role, Vid};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Queue depth between each comm wrapper and its dispatcher.
const PDU_CHANNEL_CAPACITY: usize = 1024;

pub struct Orchestrator {
    state: Arc<MlagState>,
    hal: Arc<dyn Hal>,
    mac_sync_counters: Arc<MacSyncCounters>,
    manager_task: JoinHandle<PortManagerService>,
    mac_sync_task: JoinHandle<MacSyncService>,
}

impl Orchestrator {
    /// Initializes state, builds both services with their channels, and
    /// spawns the two dispatcher loops.
    pub fn start(config: Config, hal: Arc<dyn Hal>) -> Result<Self, MlagError> {
        config
            .validate()
            .map_err(|e| MlagError::Config(e.to_string()))?;

        let MlagInit {
            state,
            manager_queues,
            mac_sync_queues,
        } = MlagState::initialize(config);

        let (control_pdu_tx, control_pdu_rx) = mpsc::channel(PDU_CHANNEL_CAPACITY);
        let (mac_pdu_tx, mac_pdu_rx) = mpsc::channel(PDU_CHANNEL_CAPACITY);

        let (control_cfg, mac_cfg, peers, local_peer) = {
            let cfg = state.config.read();
            (
                cfg.control.clone(),
                cfg.mac_sync.clone(),
                cfg.peers.clone(),
                cfg.peer_id,
            )
        };

        let control_comm = CommWrapper::new(
            "control",
            control_cfg,
            peers.clone(),
            local_peer,
            SocketProtection::NoLock,
            state.manager_bus.clone(),
            control_pdu_tx,
        );
        // The mac-sync channel carries jumbo payloads; sends serialize.
        let mac_comm = CommWrapper::new(
            "mac-sync",
            mac_cfg,
            peers,
            local_peer,
            SocketProtection::Lock,
            state.mac_sync_bus.clone(),
            mac_pdu_tx,
        );

        let manager = PortManagerService::new(state.clone(), hal.clone(), control_comm);
        let mac_sync = MacSyncService::new(state.clone(), hal.clone(), mac_comm);
        let mac_sync_counters = mac_sync.counters().clone();

        let manager_task = tokio::spawn(dispatcher::run(manager, manager_queues, control_pdu_rx));
        let mac_sync_task = tokio::spawn(dispatcher::run(mac_sync, mac_sync_queues, mac_pdu_rx));

        info!("mlag orchestrator started");
        Ok(Self {
            state,
            hal,
            mac_sync_counters,
            manager_task,
            mac_sync_task,
        })
    }

    pub fn state(&self) -> &Arc<MlagState> {
        &self.state
    }

    pub fn mac_sync_counters(&self) -> &Arc<MacSyncCounters> {
        &self.mac_sync_counters
    }

    /// (rx, tx) protocol message tallies of the port manager.
    pub fn port_counters(&self) -> (u64, u64) {
        self.state.port_db.counters().snapshot()
    }

    pub fn counters_clear(&self) {
        self.state.port_db.counters().clear();
        self.mac_sync_counters.clear();
    }

    /// Human-readable state summary for the management surface.
    pub fn dump(&self) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let _ = writeln!(
            out,
            "role: {}  local peer: {}",
            self.state.role(),
            self.state.local_peer()
        );
        let (rx, tx) = self.port_counters();
        let _ = writeln!(out, "port manager: rx={rx} tx={tx}");
        self.state.port_db.for_each(|entry| {
            let _ = writeln!(
                out,
                "port {}: mode={} conf={:?} oper={:?} local={} remote={} master={}",
                entry.port_id,
                entry.mode,
                entry.peers_configured,
                entry.peers_oper_up,
                entry.local_fsm.state(),
                entry.remote_fsm.state(),
                entry.master_fsm.state(),
            );
        });
        out
    }

    async fn post_both(&self, priority: Priority, event: SystemEvent) -> Result<(), MlagError> {
        self.state.manager_bus.post(priority, event.clone()).await?;
        self.state.mac_sync_bus.post(priority, event).await
    }

    /// Master election produced a new role for this node.
    pub async fn role_change(&self, new_role: Role) -> Result<(), MlagError> {
        self.post_both(
            Priority::Medium,
            SystemEvent::MasterElectionSwitchStatusChange { new_role },
        )
        .await
    }

    /// The health manager reports a peer ready to be brought up; a slave
    /// opens its client sessions toward the master.
    pub async fn peer_start(&self, peer_id: PeerId) -> Result<(), MlagError> {
        self.post_both(Priority::Medium, SystemEvent::PeerStart { peer_id })
            .await
    }

    /// Adds MLAG ports to the local configuration.
    pub async fn ports_add(&self, port_ids: &[PortId]) -> Result<(), MlagError> {
        self.ports_config(port_ids, false).await
    }

    /// Removes MLAG ports from the local configuration. Completion is
    /// observable as a `PortDeleted` notification.
    pub async fn ports_delete(&self, port_ids: &[PortId]) -> Result<(), MlagError> {
        self.ports_config(port_ids, true).await
    }

    async fn ports_config(&self, port_ids: &[PortId], del_ports: bool) -> Result<(), MlagError> {
        let body = PortListPdu {
            del_ports,
            mlag_id: self.state.local_peer(),
            port_ids: port_ids.iter().map(|p| *p as u32).collect(),
        };
        self.state
            .manager_bus
            .post(Priority::Medium, SystemEvent::PortsUpdate(body))
            .await
    }

    /// A local link transition, normally reported by the HAL.
    pub async fn port_oper_change(&self, port_id: PortId, up: bool) -> Result<(), MlagError> {
        self.state
            .manager_bus
            .post(Priority::Medium, SystemEvent::PortOperChange { port_id, up })
            .await
    }

    /// Declares the inter-peer link port.
    pub async fn ipl_port_set(&self, port_id: PortId) -> Result<(), MlagError> {
        self.state.config.write().ipl_port = Some(port_id);
        self.post_both(Priority::Medium, SystemEvent::IplPortSet { port_id })
            .await
    }

    /// Router interface MAC configured or removed.
    pub async fn router_mac_cfg(
        &self,
        vid: Vid,
        mac: MacAddr,
        add: bool,
    ) -> Result<(), MlagError> {
        self.state
            .mac_sync_bus
            .post(Priority::Medium, SystemEvent::RouterMacCfg { vid, mac, add })
            .await
    }

    /// Health-manager input: a peer finished coming up and may count
    /// toward quorum.
    pub async fn peer_enable(&self, peer_id: PeerId) -> Result<(), MlagError> {
        self.state
            .manager_bus
            .post(Priority::Medium, SystemEvent::PeerEnable { peer_id })
            .await
    }

    /// Simulated health-manager input: a peer's liveness changed.
    pub async fn peer_state_change(
        &self,
        peer_id: PeerId,
        state: crate::core::types::PeerState,
    ) -> Result<(), MlagError> {
        self.state
            .manager_bus
            .post(
                Priority::Medium,
                SystemEvent::PeerStateChange { peer_id, state },
            )
            .await
    }

    /// Orderly shutdown: flush the local FDB, cancel both dispatchers,
    /// and emit StopDone once they have drained.
    pub async fn stop(self) -> Result<(), MlagError> {
        info!("stopping mlag orchestrator");
        self.hal.fdb_flush(&KeyFilter::default())?;

        self.state
            .manager_bus
            .post(Priority::High, SystemEvent::Deinit)
            .await
            .ok();
        self.state
            .mac_sync_bus
            .post(Priority::High, SystemEvent::Deinit)
            .await
            .ok();

        let _ = self.manager_task.await;
        let _ = self.mac_sync_task.await;

        let _ = self.state.shutdown_tx.send(());
        self.state.notify(SystemEvent::StopDone);
        info!("mlag orchestrator stopped");
        Ok(())
    }
}
