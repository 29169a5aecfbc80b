// src/core/fdb/manager.rs

//! The mac-sync service: owns the mac-sync channel, the master ownership
//! table (when master), the peer-side control-learning glue, the router-MAC
//! table and the flush coordinator, and runs the FDB half of the peer sync
//! protocol.

use crate::core::comm::CommWrapper;
use crate::core::dispatcher::{CmdDb, Service};
use crate::core::errors::MlagError;
use crate::core::events::{Priority, SystemEvent};
use crate::core::fdb::master::{FdbMaster, MasterLearnAction};
use crate::core::fdb::peer::{FdbPeer, PeerAction};
use crate::core::fdb::router_macs::{RouterMacDb, RouterMacSync};
use crate::core::fdb::{MacSyncCounter, MacSyncCounters};
use crate::core::flush::{FlushCoordinator, FlushKey, FlushStartOutcome};
use crate::core::hal::Hal;
use crate::core::port::manager::{SYNC_TYPE_FDB, SYNC_TYPE_PORTS};
use crate::core::protocol::wire::{
    FlushRequestPdu, MacAgeBatch, MacAgeEntry, MacLearnBatch, MacLearnEntry, SyncDonePdu,
};
use crate::core::protocol::{Opcode, Pdu};
use crate::core::state::MlagState;
use crate::core::types::{PeerId, PeerSet, Role};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the channel marshalling control-learn notifications off the
/// HAL thread.
const NOTIFY_CHANNEL_CAPACITY: usize = 64;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Default)]
struct Outbox {
    pdus: Vec<(PeerId, Pdu)>,
    manager: Vec<(Priority, SystemEvent)>,
    notify: Vec<SystemEvent>,
}

pub struct MacSyncService {
    state: Arc<MlagState>,
    hal: Arc<dyn Hal>,
    comm: CommWrapper,
    cmd_db: CmdDb,
    local_peer: PeerId,
    role: Role,
    master: Option<FdbMaster>,
    peer: FdbPeer,
    router_macs: RouterMacDb,
    flush: FlushCoordinator,
    counters: Arc<MacSyncCounters>,
    /// The port half of the sync ladder finished (slave side).
    port_sync_done: bool,
    /// AllFdbGet already sent for this sync round.
    fdb_sync_requested: bool,
    notify_forwarder: Option<JoinHandle<()>>,
}

impl MacSyncService {
    pub fn new(state: Arc<MlagState>, hal: Arc<dyn Hal>, comm: CommWrapper) -> Self {
        let mut cmd_db = CmdDb::new();
        for opcode in [
            Opcode::MacLocalLearn,
            Opcode::MacLocalAge,
            Opcode::MacGlobalLearn,
            Opcode::MacGlobalAge,
            Opcode::FlushPeerStart,
            Opcode::FlushMasterStart,
            Opcode::FlushAck,
            Opcode::AllFdbGet,
            Opcode::AllFdbExport,
            Opcode::PortsSyncFinish,
            Opcode::MasterSyncDone,
        ] {
            cmd_db.register(opcode);
        }

        let counters = Arc::new(MacSyncCounters::new());
        let local_peer = state.local_peer();
        let (ipl_port, batch_max, max_router_macs, flush_cfg) = {
            let cfg = state.config.read();
            (
                cfg.ipl_port,
                cfg.fdb.notify_batch_max,
                cfg.fdb.max_router_macs,
                cfg.flush.clone(),
            )
        };
        let peer = FdbPeer::new(
            local_peer,
            ipl_port,
            state.port_db.clone(),
            counters.clone(),
            batch_max,
        );
        let router_macs = RouterMacDb::new(max_router_macs, local_peer);
        let flush = FlushCoordinator::new(&flush_cfg, state.mac_sync_bus.clone());

        // Marshal the HAL's notification callback into this service's
        // dispatcher through a bounded channel.
        let (notify_tx, notify_rx) = mpsc::channel(NOTIFY_CHANNEL_CAPACITY);
        hal.ctrl_learn_register(notify_tx);
        let bus = state.mac_sync_bus.clone();
        let notify_forwarder = tokio::spawn(forward_notifications(notify_rx, bus));

        Self {
            state,
            hal,
            comm,
            cmd_db,
            local_peer,
            role: Role::Standalone,
            master: None,
            peer,
            router_macs,
            flush,
            counters,
            port_sync_done: false,
            fdb_sync_requested: false,
            notify_forwarder: Some(notify_forwarder),
        }
    }

    pub fn comm(&self) -> &CommWrapper {
        &self.comm
    }

    pub fn counters(&self) -> &Arc<MacSyncCounters> {
        &self.counters
    }

    fn master_peer(&self) -> Option<PeerId> {
        self.state
            .config
            .read()
            .peers
            .iter()
            .map(|p| p.id)
            .find(|id| *id != self.local_peer)
    }

    /// Peers counting toward flush quorum, local slot included.
    fn peers_up(&self) -> PeerSet {
        self.state.port_db.active_peers()
    }

    /// Remote peers that receive global emissions right now.
    fn emission_targets(&self) -> Vec<PeerId> {
        self.peers_up()
            .iter()
            .filter(|p| *p != self.local_peer && self.comm.session_up(*p))
            .collect()
    }

    async fn flush_outbox(&mut self, outbox: Outbox) -> Result<(), MlagError> {
        for (peer, pdu) in outbox.pdus {
            match self.comm.send(peer, pdu).await {
                Ok(()) => {}
                Err(MlagError::PeerNotConnected(p)) => {
                    debug!(peer = p, "dropping mac-sync PDU for disconnected peer");
                }
                Err(MlagError::NotReady) => {
                    debug!("mac-sync channel not started, PDU dropped");
                }
                Err(e) => return Err(e),
            }
        }
        for (priority, event) in outbox.manager {
            self.state.manager_bus.post(priority, event).await?;
        }
        for event in outbox.notify {
            self.state.notify(event);
        }
        Ok(())
    }

    /// Routes locally staged learns: the master admits them in place, a
    /// slave ships them over the wire.
    fn route_local_learn(&mut self, entries: Vec<MacLearnEntry>, outbox: &mut Outbox) {
        if entries.is_empty() {
            return;
        }
        if self.role == Role::Master {
            let now = now_secs();
            for entry in &entries {
                let action = {
                    let flush = &self.flush;
                    self.master.as_mut().and_then(|m| {
                        m.process_local_learn(entry, now, |vid, port, class| {
                            flush.blocks_learn(vid, port, class)
                        })
                    })
                };
                if let Some(action) = action {
                    self.apply_master_learn_action(action, outbox);
                }
            }
        } else if let Some(master) = self.master_peer() {
            outbox
                .pdus
                .push((master, Pdu::MacLocalLearn(MacLearnBatch { entries })));
        }
    }

    fn route_local_age(&mut self, entries: Vec<MacAgeEntry>, outbox: &mut Outbox) {
        if entries.is_empty() {
            return;
        }
        if self.role == Role::Master {
            let mut aged = Vec::new();
            for entry in &entries {
                if let Some(age) = self.master.as_mut().and_then(|m| m.process_local_age(entry))
                {
                    aged.push(age);
                }
            }
            self.broadcast_global_age(aged, outbox);
        } else if let Some(master) = self.master_peer() {
            outbox
                .pdus
                .push((master, Pdu::MacLocalAge(MacAgeBatch { entries })));
        }
    }

    fn apply_master_learn_action(&mut self, action: MasterLearnAction, outbox: &mut Outbox) {
        match action {
            MasterLearnAction::Broadcast(entry) => {
                for peer in self.emission_targets() {
                    outbox.pdus.push((
                        peer,
                        Pdu::MacGlobalLearn(MacLearnBatch {
                            entries: vec![entry],
                        }),
                    ));
                }
                self.apply_global_learn_local(&[entry]);
            }
            MasterLearnAction::BroadcastExceptOrigin(entry) => {
                for peer in self.emission_targets() {
                    if peer != entry.originator {
                        outbox.pdus.push((
                            peer,
                            Pdu::MacGlobalLearn(MacLearnBatch {
                                entries: vec![entry],
                            }),
                        ));
                    }
                }
                if entry.originator != self.local_peer {
                    self.apply_global_learn_local(&[entry]);
                }
            }
            MasterLearnAction::ToOriginator(entry) => {
                if entry.originator == self.local_peer {
                    self.apply_global_learn_local(&[entry]);
                } else {
                    outbox.pdus.push((
                        entry.originator,
                        Pdu::MacGlobalLearn(MacLearnBatch {
                            entries: vec![entry],
                        }),
                    ));
                }
            }
        }
    }

    fn apply_global_learn_local(&mut self, entries: &[MacLearnEntry]) {
        if let Err(e) = self.peer.apply_global_learn(entries, self.hal.as_ref()) {
            warn!("global learn install failed: {e}");
        }
        for entry in entries {
            if self.router_macs.contains(entry.vid, entry.mac) {
                self.router_macs.mark_synced(entry.vid, entry.mac);
            }
        }
    }

    fn broadcast_global_age(&mut self, aged: Vec<MacAgeEntry>, outbox: &mut Outbox) {
        if aged.is_empty() {
            return;
        }
        for peer in self.emission_targets() {
            outbox.pdus.push((
                peer,
                Pdu::MacGlobalAge(MacAgeBatch {
                    entries: aged.clone(),
                }),
            ));
        }
        match self
            .peer
            .apply_global_age(&aged, self.hal.as_ref(), &mut self.router_macs)
        {
            Ok(restaged) => self.route_local_learn(restaged, outbox),
            Err(e) => warn!("global age apply failed: {e}"),
        }
    }

    /// Master-side start of a flush, from a peer's FlushStart or our own
    /// hardware notification.
    fn master_flush_start(&mut self, req: &FlushRequestPdu, outbox: &mut Outbox) {
        let key = FlushKey::from_request(&req.filter, req.origin_peer, req.non_mlag);
        let peers_up = self.peers_up();
        match self.flush.start(key, peers_up) {
            FlushStartOutcome::Started => {
                if let Some(master) = self.master.as_mut() {
                    let vid = req.filter.by_vid.then_some(req.filter.vid);
                    let port = req.filter.by_port.then_some(req.filter.port);
                    master.apply_flush(vid, port);
                }
                for peer in self.emission_targets() {
                    outbox
                        .pdus
                        .push((peer, Pdu::FlushMasterStart(req.clone())));
                }
                // Execute locally and self-ACK.
                match self.peer.execute_master_flush(req, self.hal.as_ref()) {
                    Ok(_ack) => {
                        self.flush.peer_ack(key, self.local_peer);
                    }
                    Err(e) => warn!("local flush execution failed: {e}"),
                }
            }
            FlushStartOutcome::Duplicate => {
                debug!(?key, "duplicate flush request ignored");
            }
            FlushStartOutcome::NoPeers => {
                debug!(?key, "flush with no peers up");
            }
            FlushStartOutcome::Dropped => {
                warn!(?key, "flush dropped, pool exhausted");
            }
        }
    }

    /// Sends AllFdbGet once both halves of the precondition hold: the port
    /// sync finished and the mac-sync session to the master is up.
    fn try_request_fdb_sync(&mut self, outbox: &mut Outbox) {
        if self.role != Role::Slave || self.fdb_sync_requested || !self.port_sync_done {
            return;
        }
        let Some(master) = self.master_peer() else {
            return;
        };
        if !self.comm.session_up(master) {
            return;
        }
        outbox.pdus.push((
            master,
            Pdu::AllFdbGet {
                peer_id: self.local_peer,
            },
        ));
        self.fdb_sync_requested = true;
    }

    fn dispatch_router_sync(&mut self, syncs: Vec<RouterMacSync>, outbox: &mut Outbox) {
        let mut learns = Vec::new();
        let mut ages = Vec::new();
        for sync in syncs {
            match sync {
                RouterMacSync::Learn(learn) => learns.push(learn),
                RouterMacSync::Age(age) => ages.push(age),
            }
        }
        // A slave may only push once the FDB sync concluded; unsynced
        // entries are replayed on MasterSyncDone.
        if self.role == Role::Slave && !self.peer.sync_done() {
            return;
        }
        for learn in &learns {
            self.router_macs.mark_synced(learn.vid, learn.mac);
        }
        for age in &ages {
            self.router_macs.mark_synced(age.vid, age.mac);
        }
        self.route_local_learn(learns, outbox);
        self.route_local_age(ages, outbox);
    }

    async fn role_change(&mut self, new_role: Role, outbox: &mut Outbox) -> Result<(), MlagError> {
        let old_role = self.role;
        if old_role == new_role {
            return Ok(());
        }
        info!(%old_role, %new_role, "mac-sync role change");

        self.comm.stop();
        // All in-flight flushes are abandoned on a role flip.
        self.flush.stop();
        self.peer.set_sync_done(false);
        self.port_sync_done = false;
        self.fdb_sync_requested = false;
        self.router_macs.reset_sync();

        self.role = new_role;
        self.comm.set_role(new_role);

        match new_role {
            Role::Master => {
                let (capacity, debounce) = {
                    let cfg = self.state.config.read();
                    (
                        cfg.fdb.max_entries,
                        cfg.fdb.migration_debounce.as_secs().max(1),
                    )
                };
                self.master = Some(FdbMaster::new(capacity, debounce, self.counters.clone()));
                self.comm.start()?;
                // The master's own peer side is synced by construction.
                self.peer.set_sync_done(true);
                self.port_sync_done = true;
                let syncs = self.router_macs.unsynced();
                self.dispatch_router_sync(syncs, outbox);
            }
            Role::Slave | Role::Standalone => {
                self.master = None;
            }
        }
        Ok(())
    }

    fn handle_notification_event(
        &mut self,
        cell: Arc<parking_lot::Mutex<Option<crate::core::hal::FdbNotification>>>,
        outbox: &mut Outbox,
    ) {
        let Some(notification) = cell.lock().take() else {
            return;
        };
        let master_free = self.master.as_ref().map(|m| m.free_count());
        let (decisions, actions) =
            self.peer
                .handle_notification(&notification.records, master_free, self.hal.as_ref());
        if notification.decisions.send(decisions).is_err() {
            debug!("control-learn library gone before decisions returned");
        }
        for action in actions {
            match action {
                PeerAction::SendLocalLearn(entries) => {
                    self.route_local_learn(entries, outbox);
                }
                PeerAction::InternalAge(entries) => {
                    self.internal_age(entries, outbox);
                }
                PeerAction::SendFlushStart(req) => {
                    if self.role == Role::Master {
                        self.master_flush_start(&req, outbox);
                    } else if let Some(master) = self.master_peer() {
                        outbox.pdus.push((master, Pdu::FlushPeerStart(req)));
                    }
                }
            }
        }
    }

    /// Re-installs aged entries as non-ageable so the hardware stops aging
    /// them, then reports the age to the master, which owns the decision.
    fn internal_age(
        &mut self,
        entries: Vec<crate::core::hal::FdbHwEntry>,
        outbox: &mut Outbox,
    ) {
        if entries.is_empty() {
            return;
        }
        if let Err(e) = self.hal.fdb_install(&entries) {
            warn!("non-ageable reinstall failed: {e}");
        }
        let ages = entries
            .iter()
            .map(|e| MacAgeEntry {
                vid: e.vid,
                mac: e.mac,
                originator: self.local_peer,
            })
            .collect();
        self.route_local_age(ages, outbox);
    }

    fn peer_down_sweep(&mut self, peer: PeerId, outbox: &mut Outbox) {
        let ipl_wire = self.peer.ipl_port().map(|p| p as u32);
        let aged = match self.master.as_mut() {
            Some(master) => master.peer_down(peer, ipl_wire),
            None => Vec::new(),
        };
        self.broadcast_global_age(aged, outbox);
        for key in self.flush.peer_down(peer) {
            debug!(?key, "flush completed by peer-down");
        }
    }
}

async fn forward_notifications(
    mut rx: mpsc::Receiver<crate::core::hal::FdbNotification>,
    bus: crate::core::events::EventBus,
) {
    while let Some(notification) = rx.recv().await {
        let cell = Arc::new(parking_lot::Mutex::new(Some(notification)));
        if bus
            .post(Priority::Medium, SystemEvent::CtrlLearnNotify(cell))
            .await
            .is_err()
        {
            return;
        }
    }
}

#[async_trait]
impl Service for MacSyncService {
    fn name(&self) -> &'static str {
        "mac-sync"
    }

    fn cmd_db(&self) -> &CmdDb {
        &self.cmd_db
    }

    async fn handle_event(&mut self, event: SystemEvent) -> Result<(), MlagError> {
        let mut outbox = Outbox::default();
        match event {
            SystemEvent::Deinit => {
                self.hal.ctrl_learn_unregister();
                if let Some(task) = self.notify_forwarder.take() {
                    task.abort();
                }
                self.flush.stop();
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
            SystemEvent::ConnNotify { peer_id, up } => {
                if up {
                    self.comm.install_pending();
                    self.try_request_fdb_sync(&mut outbox);
                } else {
                    self.comm.session_down(peer_id);
                    if self.role == Role::Slave {
                        // The sync ladder restarts from scratch.
                        self.peer.set_sync_done(false);
                        self.port_sync_done = false;
                        self.fdb_sync_requested = false;
                        self.router_macs.reset_sync();
                    }
                }
            }
            SystemEvent::PortsOperSyncDone { .. } => {
                self.port_sync_done = true;
                self.try_request_fdb_sync(&mut outbox);
            }
            SystemEvent::PeerStateChange { peer_id, state } => {
                if !state.is_active() && peer_id != self.local_peer {
                    self.peer_down_sweep(peer_id, &mut outbox);
                }
            }
            SystemEvent::Reconnect => {
                self.comm.reconnect()?;
            }
            SystemEvent::RouterMacCfg { vid, mac, add } => {
                self.counters.inc(MacSyncCounter::RouterMacConf);
                match self.router_macs.configure(vid, mac, add) {
                    Ok(Some(sync)) => self.dispatch_router_sync(vec![sync], &mut outbox),
                    Ok(None) => {}
                    Err(e) => warn!(%mac, vid, "router mac config rejected: {e}"),
                }
            }
            SystemEvent::IplPortSet { port_id } => {
                self.peer.set_ipl_port(Some(port_id));
            }
            SystemEvent::InternalAge { entries } => {
                self.internal_age(entries, &mut outbox);
            }
            SystemEvent::FlushFsmTimer { key } => {
                let key = FlushKey::from_raw(key);
                if self.flush.timer_fired(key) {
                    debug!(?key, "flush completed by timeout");
                }
            }
            SystemEvent::CtrlLearnNotify(cell) => {
                self.handle_notification_event(cell, &mut outbox);
            }
            SystemEvent::MacGlobalLearnLocal(batch) => {
                self.apply_global_learn_local(&batch.entries);
            }
            other => {
                debug!(event = other.name(), "event ignored by mac-sync");
            }
        }
        self.flush_outbox(outbox).await
    }

    async fn handle_pdu(&mut self, from: PeerId, pdu: Pdu) -> Result<(), MlagError> {
        if !self.comm.is_started() {
            self.counters.inc(MacSyncCounter::NotReadyDrop);
            return Ok(());
        }
        let mut outbox = Outbox::default();
        match pdu {
            Pdu::MacLocalLearn(batch) => {
                if self.role != Role::Master {
                    return Err(MlagError::Invariant(
                        "LocalLearn received by non-master".into(),
                    ));
                }
                let now = now_secs();
                for entry in &batch.entries {
                    let action = {
                        let flush = &self.flush;
                        self.master.as_mut().and_then(|m| {
                            m.process_local_learn(entry, now, |vid, port, class| {
                                flush.blocks_learn(vid, port, class)
                            })
                        })
                    };
                    if let Some(action) = action {
                        self.apply_master_learn_action(action, &mut outbox);
                    }
                }
            }
            Pdu::MacLocalAge(batch) => {
                if self.role != Role::Master {
                    return Err(MlagError::Invariant(
                        "LocalAge received by non-master".into(),
                    ));
                }
                let mut aged = Vec::new();
                for entry in &batch.entries {
                    if let Some(age) =
                        self.master.as_mut().and_then(|m| m.process_local_age(entry))
                    {
                        aged.push(age);
                    }
                }
                self.broadcast_global_age(aged, &mut outbox);
            }
            Pdu::MacGlobalLearn(batch) => {
                self.apply_global_learn_local(&batch.entries);
            }
            Pdu::MacGlobalAge(batch) => {
                match self.peer.apply_global_age(
                    &batch.entries,
                    self.hal.as_ref(),
                    &mut self.router_macs,
                ) {
                    Ok(restaged) => self.route_local_learn(restaged, &mut outbox),
                    Err(e) => warn!("global age apply failed: {e}"),
                }
            }
            Pdu::FlushPeerStart(req) => {
                if self.role != Role::Master {
                    return Err(MlagError::Invariant(
                        "peer FlushStart received by non-master".into(),
                    ));
                }
                self.master_flush_start(&req, &mut outbox);
            }
            Pdu::FlushMasterStart(req) => {
                match self.peer.execute_master_flush(&req, self.hal.as_ref()) {
                    Ok(ack) => outbox.pdus.push((from, Pdu::FlushAck(ack))),
                    Err(e) => warn!("master-ordered flush failed: {e}"),
                }
            }
            Pdu::FlushAck(ack) => {
                let key = FlushKey::from_raw(ack.key);
                if self.flush.peer_ack(key, ack.peer_id) {
                    debug!(?key, "flush completed by ACKs");
                }
            }
            Pdu::AllFdbGet { peer_id } => {
                let entries = self
                    .master
                    .as_ref()
                    .map(|m| m.export())
                    .unwrap_or_default();
                info!(peer = peer_id, count = entries.len(), "exporting FDB");
                outbox
                    .pdus
                    .push((from, Pdu::AllFdbExport(MacLearnBatch { entries })));
            }
            Pdu::AllFdbExport(batch) => {
                info!(count = batch.entries.len(), "applying FDB export");
                self.apply_global_learn_local(&batch.entries);
                outbox.pdus.push((
                    from,
                    Pdu::PortsSyncFinish(SyncDonePdu {
                        peer_id: self.local_peer,
                        state: 0,
                        sync_type: SYNC_TYPE_FDB,
                    }),
                ));
            }
            Pdu::PortsSyncFinish(body) => {
                if self.role == Role::Master && body.sync_type == SYNC_TYPE_FDB {
                    outbox.pdus.push((
                        from,
                        Pdu::MasterSyncDone(SyncDonePdu {
                            peer_id: from,
                            state: 0,
                            sync_type: SYNC_TYPE_FDB,
                        }),
                    ));
                    outbox.manager.push((
                        Priority::Medium,
                        SystemEvent::PeerSyncDone { peer_id: from },
                    ));
                } else if body.sync_type == SYNC_TYPE_PORTS {
                    debug!("port-level sync finish on mac-sync channel ignored");
                }
            }
            Pdu::MasterSyncDone(_) => {
                self.peer.set_sync_done(true);
                let syncs = self.router_macs.unsynced();
                self.dispatch_router_sync(syncs, &mut outbox);
                if let Some(master) = self.master_peer() {
                    outbox.manager.push((
                        Priority::Medium,
                        SystemEvent::PeerSyncDone { peer_id: master },
                    ));
                }
            }
            other => {
                return Err(MlagError::Invariant(format!(
                    "unexpected {} on mac-sync channel",
                    other.opcode().name()
                )));
            }
        }
        self.flush_outbox(outbox).await
    }
}
