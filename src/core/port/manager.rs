// src/core/port/manager.rs

//! The port-manager service: owns the control channel, drives the per-port
//! FSMs from local HAL events, peer PDUs and master emissions, and runs the
//! port-level half of the peer sync protocol.

use crate::core::comm::CommWrapper;
use crate::core::dispatcher::{CmdDb, Service};
use crate::core::errors::MlagError;
use crate::core::events::{Priority, SystemEvent};
use crate::core::hal::Hal;
use crate::core::port::db::PortEntry;
use crate::core::port::master_fsm::{MasterAction, MasterView};
use crate::core::port::remote_fsm::RemoteView;
use crate::core::protocol::wire::{
    GlobalPortState, PeerPortOperChangePdu, PortGlobalStatePdu, PortListPdu, PortOperState,
    PortsOperUpdatePdu, SyncDonePdu,
};
use crate::core::protocol::{Opcode, Pdu};
use crate::core::state::MlagState;
use crate::core::types::{PeerId, PeerState, PortId, PortMode, Role};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// `sync_type` values carried by the SyncDone family.
pub const SYNC_TYPE_PORTS: u8 = 0;
pub const SYNC_TYPE_FDB: u8 = 1;

/// PDUs and event posts accumulated while port locks are held, flushed
/// afterwards.
#[derive(Default)]
struct Outbox {
    pdus: Vec<(PeerId, Pdu)>,
    local: Vec<(Priority, SystemEvent)>,
    mac_sync: Vec<(Priority, SystemEvent)>,
    notify: Vec<SystemEvent>,
}

pub struct PortManagerService {
    state: Arc<MlagState>,
    hal: Arc<dyn Hal>,
    comm: CommWrapper,
    cmd_db: CmdDb,
    local_peer: PeerId,
    role: Role,
    ipl_port: Option<PortId>,
}

impl PortManagerService {
    pub fn new(state: Arc<MlagState>, hal: Arc<dyn Hal>, comm: CommWrapper) -> Self {
        let mut cmd_db = CmdDb::new();
        for opcode in [
            Opcode::PortsSync,
            Opcode::PortsUpdate,
            Opcode::PortsOperUpdate,
            Opcode::PortGlobalState,
            Opcode::PeerPortOperChange,
            Opcode::PortsSyncDone,
            Opcode::PortsSyncFinish,
        ] {
            cmd_db.register(opcode);
        }
        let local_peer = state.local_peer();
        let ipl_port = state.config.read().ipl_port;
        Self {
            state,
            hal,
            comm,
            cmd_db,
            local_peer,
            role: Role::Standalone,
            ipl_port,
        }
    }

    pub fn comm(&self) -> &CommWrapper {
        &self.comm
    }

    /// The single remote slot in a two-chassis deployment; on a slave this
    /// is the master's session.
    fn master_peer(&self) -> Option<PeerId> {
        self.state
            .config
            .read()
            .peers
            .iter()
            .map(|p| p.id)
            .find(|id| *id != self.local_peer)
    }

    fn remote_view(&self, entry: &PortEntry) -> RemoteView {
        RemoteView::new(
            entry.peers_configured,
            entry.peers_oper_up,
            self.local_peer,
        )
    }

    fn master_view(&self, entry: &PortEntry) -> MasterView {
        MasterView {
            configured: entry.peers_configured,
            oper_up: entry.peers_oper_up,
            active: self.state.port_db.active_peers(),
        }
    }

    /// Peers receiving master emissions: enabled, with a session, not us.
    fn emission_targets(&self) -> Vec<PeerId> {
        self.state
            .port_db
            .active_peers()
            .iter()
            .filter(|p| *p != self.local_peer && self.comm.session_up(*p))
            .collect()
    }

    async fn flush(&mut self, outbox: Outbox) -> Result<(), MlagError> {
        for (peer, pdu) in outbox.pdus {
            match self.comm.send(peer, pdu).await {
                Ok(()) => {
                    self.state
                        .port_db
                        .counters()
                        .tx_protocol_msg
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(MlagError::PeerNotConnected(p)) => {
                    debug!(peer = p, "dropping PDU for disconnected peer");
                }
                Err(e) => return Err(e),
            }
        }
        for (priority, event) in outbox.local {
            self.state.manager_bus.post(priority, event).await?;
        }
        for (priority, event) in outbox.mac_sync {
            self.state.mac_sync_bus.post(priority, event).await?;
        }
        for event in outbox.notify {
            self.state.notify(event);
        }
        Ok(())
    }

    fn apply_master_actions(
        &self,
        port_id: PortId,
        actions: Vec<MasterAction>,
        outbox: &mut Outbox,
    ) {
        let wire_port = port_id as u32;
        for action in actions {
            match action {
                MasterAction::BroadcastGlobalState(state) => {
                    let body = PortGlobalStatePdu {
                        states: vec![(wire_port, state)],
                    };
                    for peer in self.emission_targets() {
                        outbox
                            .pdus
                            .push((peer, Pdu::PortGlobalState(body.clone())));
                    }
                    outbox.local.push((
                        Priority::Medium,
                        SystemEvent::PortGlobalState(body),
                    ));
                }
                MasterAction::SendGlobalStateTo { peer, states } => {
                    for state in states {
                        let body = PortGlobalStatePdu {
                            states: vec![(wire_port, state)],
                        };
                        if peer == self.local_peer {
                            outbox
                                .local
                                .push((Priority::Medium, SystemEvent::PortGlobalState(body)));
                        } else {
                            outbox.pdus.push((peer, Pdu::PortGlobalState(body)));
                        }
                    }
                }
                MasterAction::ForwardOperChange { origin, up } => {
                    let body = PeerPortOperChangePdu {
                        mlag_id: origin,
                        port_id: wire_port,
                        state: if up {
                            PortOperState::Up
                        } else {
                            PortOperState::Down
                        },
                        is_ipl: Some(port_id) == self.ipl_port,
                    };
                    for peer in self.emission_targets() {
                        if peer != origin {
                            outbox
                                .pdus
                                .push((peer, Pdu::PeerPortOperChange(body.clone())));
                        }
                    }
                }
                MasterAction::ConfChange { origin, deleted } => {
                    let body = PortListPdu {
                        del_ports: deleted,
                        mlag_id: origin,
                        port_ids: vec![wire_port],
                    };
                    for peer in self.emission_targets() {
                        if peer != origin {
                            outbox.pdus.push((peer, Pdu::PortsUpdate(body.clone())));
                        }
                    }
                }
            }
        }
    }

    /// Applies a batch of port configuration changes from `origin` (local
    /// management, a peer's PortsUpdate, or the master's conf-change
    /// forwarding).
    fn ports_update(
        &mut self,
        origin: PeerId,
        del_ports: bool,
        port_ids: &[PortId],
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        // Local configuration changes propagate before any global-state
        // emission they trigger: a slave forwards them to the master, the
        // master broadcasts them to every enabled peer.
        if origin == self.local_peer {
            let body = PortListPdu {
                del_ports,
                mlag_id: self.local_peer,
                port_ids: port_ids.iter().map(|p| *p as u32).collect(),
            };
            match self.role {
                Role::Slave => {
                    if let Some(master) = self.master_peer() {
                        outbox.pdus.push((master, Pdu::PortsUpdate(body)));
                    }
                }
                Role::Master => {
                    for peer in self.emission_targets() {
                        outbox.pdus.push((peer, Pdu::PortsUpdate(body.clone())));
                    }
                }
                Role::Standalone => {}
            }
        }

        for &port_id in port_ids {
            if del_ports {
                self.port_del_one(origin, port_id, outbox)?;
            } else {
                self.port_add_one(origin, port_id, outbox)?;
            }
        }
        Ok(())
    }

    fn port_add_one(
        &mut self,
        origin: PeerId,
        port_id: PortId,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        let entry = match self.state.port_db.allocate(port_id) {
            Ok(entry) => entry,
            Err(MlagError::Capacity(pool)) => {
                warn!(port = port_id, "port add denied: {pool} exhausted");
                if origin == self.local_peer {
                    outbox.notify.push(SystemEvent::PortDeleted {
                        port_id,
                        success: false,
                    });
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let mut entry = entry.lock();
        entry.peers_configured.insert(origin);
        entry.remote_fsm.port_add();
        if origin == self.local_peer {
            entry.local_fsm.port_add();
        }
        if self.role == Role::Master {
            let view = self.master_view(&entry);
            let actions = entry.master_fsm.port_add(origin, view);
            drop(entry);
            self.apply_master_actions(port_id, actions, outbox);
        }
        Ok(())
    }

    fn port_del_one(
        &mut self,
        origin: PeerId,
        port_id: PortId,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        let Some(entry) = self.state.port_db.lookup(port_id) else {
            debug!(port = port_id, "delete for unknown port");
            return Ok(());
        };
        let mut entry = entry.lock();
        entry.peers_configured.remove(origin);
        entry.peers_oper_up.remove(origin);
        if origin == self.local_peer {
            entry.local_fsm.port_del(self.hal.as_ref())?;
        }
        let view = self.remote_view(&entry);
        entry.remote_fsm.port_del(view, self.hal.as_ref())?;
        if self.role == Role::Master {
            let view = self.master_view(&entry);
            let actions = entry.master_fsm.port_del(origin, view);
            let empty = entry.peers_configured.is_empty();
            drop(entry);
            self.apply_master_actions(port_id, actions, outbox);
            self.finish_delete(origin, port_id, empty, outbox)?;
        } else {
            let empty = entry.peers_configured.is_empty();
            drop(entry);
            self.finish_delete(origin, port_id, empty, outbox)?;
        }
        Ok(())
    }

    fn finish_delete(
        &mut self,
        origin: PeerId,
        port_id: PortId,
        empty: bool,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        if empty {
            self.state.port_db.delete(port_id)?;
        }
        if origin == self.local_peer {
            outbox.notify.push(SystemEvent::PortDeleted {
                port_id,
                success: true,
            });
        }
        Ok(())
    }

    /// Applies the master's fused verdicts to the local stack.
    fn apply_global_states(
        &mut self,
        body: &PortGlobalStatePdu,
        _outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        for (wire_port, state) in &body.states {
            let port_id = *wire_port as PortId;
            let Some(entry) = self.state.port_db.lookup(port_id) else {
                debug!(port = port_id, "global state for unknown port");
                continue;
            };
            let mut entry = entry.lock();
            let view = self.remote_view(&entry);
            let hal = self.hal.as_ref();
            match state {
                GlobalPortState::Enabled => {
                    if entry.peers_configured.contains(self.local_peer) {
                        entry.local_fsm.port_global_enable(hal)?;
                    }
                    entry.remote_fsm.port_global_enable(view, hal)?;
                }
                GlobalPortState::Disabled => {
                    entry.local_fsm.port_global_disable(hal)?;
                    entry.remote_fsm.port_global_disable(hal)?;
                }
                GlobalPortState::OperDown => {
                    entry.local_fsm.port_global_down(hal)?;
                    entry.remote_fsm.port_global_down(hal)?;
                }
                GlobalPortState::OperUp => {
                    entry.local_fsm.port_global_up(hal)?;
                    // Global-up re-arms the remote view as well; a port
                    // parked in GlobalDown re-evaluates its isolation.
                    entry.remote_fsm.port_global_enable(view, hal)?;
                }
            }
        }
        Ok(())
    }

    /// A local link transition from the HAL.
    fn local_oper_change(
        &mut self,
        port_id: PortId,
        up: bool,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        let Some(entry) = self.state.port_db.lookup(port_id) else {
            return Err(MlagError::NotFound(format!("port {port_id}")));
        };
        let mut entry = entry.lock();
        if up {
            entry.local_fsm.port_up(self.hal.as_ref())?;
            if entry.peers_configured.contains(self.local_peer) {
                entry.peers_oper_up.insert(self.local_peer);
            }
        } else {
            entry.local_fsm.port_down(self.hal.as_ref())?;
            entry.peers_oper_up.remove(self.local_peer);
        }

        if self.role == Role::Master {
            let view = self.master_view(&entry);
            let actions = if up {
                entry.master_fsm.port_up(self.local_peer, view)
            } else {
                entry.master_fsm.port_down(self.local_peer, view)
            };
            drop(entry);
            self.apply_master_actions(port_id, actions, outbox);
        } else {
            drop(entry);
            if let Some(master) = self.master_peer() {
                outbox.pdus.push((
                    master,
                    Pdu::PeerPortOperChange(PeerPortOperChangePdu {
                        mlag_id: self.local_peer,
                        port_id: port_id as u32,
                        state: if up {
                            PortOperState::Up
                        } else {
                            PortOperState::Down
                        },
                        is_ipl: Some(port_id) == self.ipl_port,
                    }),
                ));
            }
        }
        Ok(())
    }

    /// A remote peer's link transition (PDU from a slave on the master, or
    /// the master's forwarding on a slave).
    fn peer_oper_change(
        &mut self,
        body: &PeerPortOperChangePdu,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        let origin = body.mlag_id;
        if origin == self.local_peer {
            return Ok(());
        }
        let port_id = body.port_id as PortId;
        let Some(entry) = self.state.port_db.lookup(port_id) else {
            debug!(port = port_id, "oper change for unknown port");
            return Ok(());
        };
        let up = body.state.is_up();
        let mut entry = entry.lock();
        // The view passed to the remote FSM predates this transition.
        let view = self.remote_view(&entry);
        if up {
            entry
                .remote_fsm
                .peer_port_up(origin, view, self.hal.as_ref())?;
            if entry.peers_configured.contains(origin) {
                entry.peers_oper_up.insert(origin);
            }
        } else {
            entry.remote_fsm.peer_port_down(self.hal.as_ref())?;
            entry.peers_oper_up.remove(origin);
        }

        if self.role == Role::Master {
            let view = self.master_view(&entry);
            let actions = if up {
                entry.master_fsm.port_up(origin, view)
            } else {
                entry.master_fsm.port_down(origin, view)
            };
            drop(entry);
            self.apply_master_actions(port_id, actions, outbox);
        }
        Ok(())
    }

    /// Liveness transition for one peer.
    fn peer_state_change(
        &mut self,
        peer: PeerId,
        new_state: PeerState,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        self.state.port_db.peer_state_set(peer, new_state);
        if peer == self.local_peer {
            return Ok(());
        }

        let hal = self.hal.clone();
        let local_peer = self.local_peer;
        let is_master = self.role == Role::Master;
        let active = self.state.port_db.active_peers();
        let mut master_emissions: Vec<(PortId, Vec<MasterAction>)> = Vec::new();

        self.state.port_db.for_each(|entry| {
            if new_state.is_active() {
                let view = RemoteView::new(entry.peers_configured, entry.peers_oper_up, local_peer);
                let _ = entry.remote_fsm.peer_enable(view, hal.as_ref());
                if is_master {
                    let view = MasterView {
                        configured: entry.peers_configured,
                        oper_up: entry.peers_oper_up,
                        active,
                    };
                    master_emissions.push((entry.port_id, entry.master_fsm.peer_active(peer, view)));
                }
            } else {
                entry.peers_oper_up.remove(peer);
                let view = RemoteView::new(entry.peers_configured, entry.peers_oper_up, local_peer);
                let _ = entry.remote_fsm.peer_down(view, hal.as_ref());
                if is_master {
                    let view = MasterView {
                        configured: entry.peers_configured,
                        oper_up: entry.peers_oper_up,
                        active,
                    };
                    master_emissions.push((entry.port_id, entry.master_fsm.peer_down(view)));
                }
            }
        });

        for (port_id, actions) in master_emissions {
            self.apply_master_actions(port_id, actions, outbox);
        }

        // The FDB side runs its own peer-down sweep.
        outbox.mac_sync.push((
            Priority::Medium,
            SystemEvent::PeerStateChange {
                peer_id: peer,
                state: new_state,
            },
        ));
        Ok(())
    }

    /// Master side of the port sync: a freshly connected slave announced
    /// its configuration snapshot.
    fn handle_ports_sync(
        &mut self,
        body: &PortListPdu,
        outbox: &mut Outbox,
    ) -> Result<(), MlagError> {
        let origin = body.mlag_id;
        let announced: Vec<PortId> = body.port_ids.iter().map(|p| *p as PortId).collect();

        // Ports the peer no longer claims are deletions.
        let stale: Vec<PortId> = self
            .state
            .port_db
            .port_ids()
            .into_iter()
            .filter(|id| {
                !announced.contains(id)
                    && self
                        .state
                        .port_db
                        .lookup(*id)
                        .map(|e| e.lock().peers_configured.contains(origin))
                        .unwrap_or(false)
            })
            .collect();
        self.ports_update(origin, true, &stale, outbox)?;
        self.ports_update(origin, false, &announced, outbox)?;

        // Respond with every peer's configuration and oper state.
        let peer_ids: Vec<PeerId> = self.state.config.read().peers.iter().map(|p| p.id).collect();
        for q in peer_ids {
            if q == origin {
                continue;
            }
            let mut ports = Vec::new();
            let mut states = Vec::new();
            self.state.port_db.for_each(|entry| {
                if entry.peers_configured.contains(q) {
                    ports.push(entry.port_id as u32);
                    states.push((
                        entry.port_id as u32,
                        if entry.peers_oper_up.contains(q) {
                            PortOperState::Up
                        } else {
                            PortOperState::Down
                        },
                    ));
                }
            });
            if ports.is_empty() {
                continue;
            }
            outbox.pdus.push((
                origin,
                Pdu::PortsSync(PortListPdu {
                    del_ports: false,
                    mlag_id: q,
                    port_ids: ports,
                }),
            ));
            outbox.pdus.push((
                origin,
                Pdu::PortsOperUpdate(PortsOperUpdatePdu {
                    mlag_id: q,
                    states,
                }),
            ));
        }
        outbox.pdus.push((
            origin,
            Pdu::PortsSyncDone(SyncDonePdu {
                peer_id: origin,
                state: 0,
                sync_type: SYNC_TYPE_PORTS,
            }),
        ));
        Ok(())
    }

    /// Slave side: the master finished streaming configurations.
    fn handle_ports_sync_done(&mut self, outbox: &mut Outbox) {
        if let Some(master) = self.master_peer() {
            outbox.pdus.push((
                master,
                Pdu::PortsSyncFinish(SyncDonePdu {
                    peer_id: self.local_peer,
                    state: 0,
                    sync_type: SYNC_TYPE_PORTS,
                }),
            ));
            outbox.local.push((
                Priority::Medium,
                SystemEvent::PortsOperSyncDone { peer_id: master },
            ));
            // The FDB half of the sync may begin.
            outbox.mac_sync.push((
                Priority::Medium,
                SystemEvent::PortsOperSyncDone { peer_id: master },
            ));
        }
    }

    /// Sends this node's configuration snapshot to the master; the opening
    /// move of the sync ladder.
    fn send_ports_sync(&mut self, outbox: &mut Outbox) {
        let Some(master) = self.master_peer() else {
            return;
        };
        let local = self.local_peer;
        let mut ports = Vec::new();
        self.state.port_db.for_each(|entry| {
            if entry.peers_configured.contains(local) {
                ports.push(entry.port_id as u32);
            }
        });
        outbox.pdus.push((
            master,
            Pdu::PortsSync(PortListPdu {
                del_ports: false,
                mlag_id: local,
                port_ids: ports,
            }),
        ));
    }

    /// Slave lost the session to the master: assume split-brain and shut
    /// every MLAG port. The full sync repeats on recovery.
    fn split_brain_shutdown(&mut self) {
        warn!("session to master lost; shutting all MLAG ports");
        let hal = self.hal.clone();
        self.state.port_db.for_each(|entry| {
            let _ = entry.local_fsm.port_global_disable(hal.as_ref());
            let _ = entry.remote_fsm.port_global_disable(hal.as_ref());
        });
    }

    async fn role_change(&mut self, new_role: Role, outbox: &mut Outbox) -> Result<(), MlagError> {
        let old_role = self.role;
        if old_role == new_role {
            return Ok(());
        }
        info!(%old_role, %new_role, "port manager role change");

        self.comm.stop();
        self.state.port_db.clear_peer_states();

        let hal = self.hal.clone();
        let local_peer = self.local_peer;
        self.state.port_db.for_each(|entry| {
            // Remote views are rebuilt by the fresh sync.
            let remote_oper = entry.peers_oper_up.without(local_peer);
            for peer in remote_oper.iter() {
                entry.peers_oper_up.remove(peer);
            }
            let view = RemoteView::new(entry.peers_configured, entry.peers_oper_up, local_peer);
            let _ = entry.remote_fsm.peer_down(view, hal.as_ref());
            entry.master_fsm.reset();
        });

        self.role = new_role;
        self.state.set_role(new_role);
        self.comm.set_role(new_role);

        match new_role {
            Role::Master => {
                self.state
                    .port_db
                    .peer_state_set(self.local_peer, PeerState::Enabled);
                self.comm.start()?;
                // Seed the master view from our own configuration.
                let active = self.state.port_db.active_peers();
                let mut emissions = Vec::new();
                self.state.port_db.for_each(|entry| {
                    if entry.peers_configured.contains(local_peer) {
                        let view = MasterView {
                            configured: entry.peers_configured,
                            oper_up: entry.peers_oper_up,
                            active,
                        };
                        emissions
                            .push((entry.port_id, entry.master_fsm.port_add(local_peer, view)));
                    }
                });
                for (port_id, actions) in emissions {
                    self.apply_master_actions(port_id, actions, outbox);
                }
            }
            Role::Slave => {
                // The client connects on PeerStart.
            }
            Role::Standalone => {
                if old_role == Role::Slave {
                    self.lacp_redo();
                }
            }
        }
        Ok(())
    }

    /// Slave→Standalone toggles LACP ports so the host renegotiates its
    /// aggregator against a single chassis.
    fn lacp_redo(&mut self) {
        let hal = self.hal.clone();
        let local_peer = self.local_peer;
        self.state.port_db.for_each(|entry| {
            if entry.mode == PortMode::Lacp
                && entry.peers_configured.contains(local_peer)
                && entry.local_fsm.admin_up()
            {
                let _ = hal.port_admin_set(entry.port_id, false);
                let _ = hal.port_admin_set(entry.port_id, true);
            }
        });
    }
}

#[async_trait]
impl Service for PortManagerService {
    fn name(&self) -> &'static str {
        "port-manager"
    }

    fn cmd_db(&self) -> &CmdDb {
        &self.cmd_db
    }

    async fn handle_event(&mut self, event: SystemEvent) -> Result<(), MlagError> {
        let mut outbox = Outbox::default();
        match event {
            SystemEvent::Deinit => {
                self.comm.stop();
                return Err(MlagError::Cancelled);
            }
            SystemEvent::MasterElectionSwitchStatusChange { new_role } => {
                self.role_change(new_role, &mut outbox).await?;
            }
            SystemEvent::PeerStart { .. } => {
                if self.role == Role::Slave {
                    self.comm.start()?;
                }
            }
            SystemEvent::PeerEnable { peer_id } => {
                self.peer_state_change(peer_id, PeerState::Enabled, &mut outbox)?;
            }
            SystemEvent::PeerStateChange { peer_id, state } => {
                self.peer_state_change(peer_id, state, &mut outbox)?;
            }
            SystemEvent::ConnNotify { peer_id, up } => {
                if up {
                    self.comm.install_pending();
                    if self.role == Role::Slave {
                        self.send_ports_sync(&mut outbox);
                    }
                } else {
                    self.comm.session_down(peer_id);
                    if self.role == Role::Slave {
                        self.split_brain_shutdown();
                    }
                    self.peer_state_change(peer_id, PeerState::Down, &mut outbox)?;
                }
            }
            SystemEvent::Reconnect => {
                self.comm.reconnect()?;
            }
            SystemEvent::PortOperChange { port_id, up } => {
                self.local_oper_change(port_id, up, &mut outbox)?;
            }
            SystemEvent::PortGlobalState(body) => {
                self.apply_global_states(&body, &mut outbox)?;
            }
            SystemEvent::PortsUpdate(body) => {
                let ports: Vec<PortId> = body.port_ids.iter().map(|p| *p as PortId).collect();
                self.ports_update(body.mlag_id, body.del_ports, &ports, &mut outbox)?;
            }
            SystemEvent::PeerPortOperChange(body) => {
                self.peer_oper_change(&body, &mut outbox)?;
            }
            SystemEvent::PortsOperUpdate(body) => {
                for (port, oper) in &body.states {
                    self.peer_oper_change(
                        &PeerPortOperChangePdu {
                            mlag_id: body.mlag_id,
                            port_id: *port,
                            state: *oper,
                            is_ipl: false,
                        },
                        &mut outbox,
                    )?;
                }
            }
            SystemEvent::IplPortSet { port_id } => {
                self.ipl_port = Some(port_id);
            }
            SystemEvent::PeerSyncDone { peer_id } => {
                // Raised by the mac-sync side once the FDB sync concluded.
                self.state
                    .port_db
                    .peer_state_set(peer_id, PeerState::TxEnabled);
                self.state.notify(SystemEvent::PeerSyncDone { peer_id });
            }
            other => {
                debug!(event = other.name(), "event ignored by port manager");
            }
        }
        self.flush(outbox).await
    }

    async fn handle_pdu(&mut self, from: PeerId, pdu: Pdu) -> Result<(), MlagError> {
        if !self.comm.is_started() {
            // Not yet started; drop with a counter increment.
            self.state
                .port_db
                .counters()
                .rx_protocol_msg
                .fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        self.state
            .port_db
            .counters()
            .rx_protocol_msg
            .fetch_add(1, Ordering::Relaxed);

        let mut outbox = Outbox::default();
        match pdu {
            Pdu::PortsSync(body) => {
                if self.role == Role::Master {
                    self.handle_ports_sync(&body, &mut outbox)?;
                } else {
                    // Master streaming another peer's configuration to us.
                    let ports: Vec<PortId> = body.port_ids.iter().map(|p| *p as PortId).collect();
                    self.ports_update(body.mlag_id, body.del_ports, &ports, &mut outbox)?;
                }
            }
            Pdu::PortsUpdate(body) => {
                let ports: Vec<PortId> = body.port_ids.iter().map(|p| *p as PortId).collect();
                self.ports_update(body.mlag_id, body.del_ports, &ports, &mut outbox)?;
            }
            Pdu::PortsOperUpdate(body) => {
                for (port, oper) in &body.states {
                    self.peer_oper_change(
                        &PeerPortOperChangePdu {
                            mlag_id: body.mlag_id,
                            port_id: *port,
                            state: *oper,
                            is_ipl: false,
                        },
                        &mut outbox,
                    )?;
                }
            }
            Pdu::PortGlobalState(body) => {
                self.apply_global_states(&body, &mut outbox)?;
            }
            Pdu::PeerPortOperChange(body) => {
                self.peer_oper_change(&body, &mut outbox)?;
            }
            Pdu::PortsSyncDone(_) => {
                self.handle_ports_sync_done(&mut outbox);
            }
            Pdu::PortsSyncFinish(body) => {
                if self.role == Role::Master && body.sync_type == SYNC_TYPE_PORTS {
                    // The slave applied the port sync; it now counts toward
                    // quorum and receives master emissions.
                    self.peer_state_change(from, PeerState::Enabled, &mut outbox)?;
                }
            }
            other => {
                return Err(MlagError::Invariant(format!(
                    "unexpected {} on control channel",
                    other.opcode().name()
                )));
            }
        }
        self.flush(outbox).await
    }
}
