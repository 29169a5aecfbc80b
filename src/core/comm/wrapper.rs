// src/core/comm/wrapper.rs

//! The TCP session pair for one channel (control or mac-sync).
//!
//! Roles follow master election: the master opens a listening socket on the
//! channel's well-known port, slaves connect to it and own the retry loop.
//! A failed connect or a torn-down session arms the reconnect timer, which
//! fires a `Reconnect` system event; the dispatcher then re-invokes `start`
//! on this wrapper. Connections arriving while the wrapper is stopped are
//! rejected.

use crate::config::{CommChannelConfig, PeerConfig};
use crate::core::dispatcher::PduEnvelope;
use crate::core::errors::MlagError;
use crate::core::events::{EventBus, Priority, SystemEvent};
use crate::core::metrics;
use crate::core::protocol::Pdu;
use crate::core::types::{MAX_PEERS, PeerId, PeerSet, Role};
use rand::Rng;
use std::net::SocketAddr;
use std::time::Duration;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{SessionHandle, SocketProtection};

/// Per-channel send/receive tallies. Increments may race with the
/// management reader; approximate values are acceptable.
#[derive(Debug, Default)]
pub struct WrapperCounters {
    pub tx_msg: AtomicU64,
    pub rx_msg: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub reconnects: AtomicU64,
}

impl WrapperCounters {
    pub fn clear(&self) {
        self.tx_msg.store(0, Ordering::Relaxed);
        self.rx_msg.store(0, Ordering::Relaxed);
        self.protocol_errors.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.tx_msg.load(Ordering::Relaxed),
            self.rx_msg.load(Ordering::Relaxed),
            self.protocol_errors.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
        )
    }
}

pub struct CommWrapper {
    /// Channel label for logs and metrics ("control" / "mac-sync").
    name: &'static str,
    cfg: CommChannelConfig,
    peers: Vec<PeerConfig>,
    local_peer: PeerId,
    role: Role,
    protection: SocketProtection,
    is_started: Arc<AtomicBool>,
    sessions: Vec<Option<SessionHandle>>,
    connecting: [bool; MAX_PEERS],
    counters: Arc<WrapperCounters>,
    events: EventBus,
    pdu_tx: mpsc::Sender<PduEnvelope>,
    pending_tx: mpsc::UnboundedSender<SessionHandle>,
    pending_rx: mpsc::UnboundedReceiver<SessionHandle>,
    accept_task: Option<JoinHandle<()>>,
}

impl CommWrapper {
    pub fn new(
        name: &'static str,
        cfg: CommChannelConfig,
        peers: Vec<PeerConfig>,
        local_peer: PeerId,
        protection: SocketProtection,
        events: EventBus,
        pdu_tx: mpsc::Sender<PduEnvelope>,
    ) -> Self {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Self {
            name,
            cfg,
            peers,
            local_peer,
            role: Role::Standalone,
            protection,
            is_started: Arc::new(AtomicBool::new(false)),
            sessions: (0..MAX_PEERS).map(|_| None).collect(),
            connecting: [false; MAX_PEERS],
            counters: Arc::new(WrapperCounters::default()),
            events,
            pdu_tx,
            pending_tx,
            pending_rx,
            accept_task: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn counters(&self) -> &Arc<WrapperCounters> {
        &self.counters
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::Relaxed)
    }

    pub fn session_up(&self, peer: PeerId) -> bool {
        self.sessions
            .get(peer as usize)
            .map(|s| s.is_some())
            .unwrap_or(false)
    }

    /// Peers with an established session.
    pub fn connected_peers(&self) -> PeerSet {
        let mut set = PeerSet::EMPTY;
        for (idx, session) in self.sessions.iter().enumerate() {
            if session.is_some() {
                set.insert(idx as PeerId);
            }
        }
        set
    }

    /// Starts (or resumes) the channel for the current role. Master spawns
    /// the accept loop; slave kicks a connect attempt per missing remote
    /// session. Safe to call repeatedly, which is exactly what the
    /// reconnect path does.
    pub fn start(&mut self) -> Result<(), MlagError> {
        self.is_started.store(true, Ordering::Relaxed);
        match self.role {
            Role::Master => self.start_server(),
            Role::Slave => {
                self.start_clients();
                Ok(())
            }
            Role::Standalone => Ok(()),
        }
    }

    fn start_server(&mut self) -> Result<(), MlagError> {
        if self.accept_task.is_some() {
            return Ok(());
        }
        let addr: SocketAddr = format!("0.0.0.0:{}", self.cfg.port)
            .parse()
            .map_err(|e| MlagError::Config(format!("bad listen address: {e}")))?;
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        let _ = socket.set_send_buffer_size(self.cfg.sndbuf as u32);
        let _ = socket.set_recv_buffer_size(self.cfg.rcvbuf as u32);
        socket.bind(addr)?;
        let listener = socket.listen((MAX_PEERS * 2) as u32)?;
        info!(channel = self.name, %addr, "listening for peer sessions");

        let name = self.name;
        let is_started = self.is_started.clone();
        let peers = self.peers.clone();
        let local_peer = self.local_peer;
        let protection = self.protection;
        let max_pdu_len = self.cfg.max_pdu_len;
        let pdu_tx = self.pdu_tx.clone();
        let events = self.events.clone();
        let counters = self.counters.clone();
        let pending_tx = self.pending_tx.clone();

        self.accept_task = Some(tokio::spawn(async move {
            loop {
                let (stream, remote) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(channel = name, "accept failed: {e}");
                        continue;
                    }
                };
                if !is_started.load(Ordering::Relaxed) {
                    debug!(channel = name, %remote, "rejecting connection: not started");
                    continue;
                }
                let Some(peer_id) = classify_peer(&peers, local_peer, remote) else {
                    warn!(channel = name, %remote, "rejecting connection: unknown peer");
                    continue;
                };
                info!(channel = name, peer = peer_id, %remote, "peer session accepted");
                let handle = SessionHandle::spawn(
                    peer_id,
                    stream,
                    protection,
                    max_pdu_len,
                    pdu_tx.clone(),
                    events.clone(),
                    counters.clone(),
                );
                if pending_tx.send(handle).is_err() {
                    return;
                }
                let _ = events
                    .post(Priority::Medium, SystemEvent::ConnNotify { peer_id, up: true })
                    .await;
            }
        }));
        Ok(())
    }

    fn start_clients(&mut self) {
        for peer in self.peers.clone() {
            if peer.id == self.local_peer {
                continue;
            }
            let slot = peer.id as usize;
            if self.sessions[slot].is_some() || self.connecting[slot] {
                continue;
            }
            self.connecting[slot] = true;
            self.spawn_connect(peer);
        }
    }

    fn spawn_connect(&self, peer: PeerConfig) {
        let name = self.name;
        let cfg = self.cfg.clone();
        let protection = self.protection;
        let pdu_tx = self.pdu_tx.clone();
        let events = self.events.clone();
        let counters = self.counters.clone();
        let pending_tx = self.pending_tx.clone();
        let is_started = self.is_started.clone();

        tokio::spawn(async move {
            let target = format!("{}:{}", peer.addr, cfg.port);
            let result = async {
                let addr: SocketAddr = target
                    .parse()
                    .map_err(|e| MlagError::Config(format!("bad peer address '{target}': {e}")))?;
                let socket = TcpSocket::new_v4()?;
                let _ = socket.set_send_buffer_size(cfg.sndbuf as u32);
                let _ = socket.set_recv_buffer_size(cfg.rcvbuf as u32);
                let stream = socket.connect(addr).await?;
                Ok::<TcpStream, MlagError>(stream)
            }
            .await;

            if !is_started.load(Ordering::Relaxed) {
                return;
            }
            match result {
                Ok(stream) => {
                    info!(channel = name, peer = peer.id, "connected to master");
                    let handle = SessionHandle::spawn(
                        peer.id,
                        stream,
                        protection,
                        cfg.max_pdu_len,
                        pdu_tx,
                        events.clone(),
                        counters,
                    );
                    if pending_tx.send(handle).is_err() {
                        return;
                    }
                    let _ = events
                        .post(
                            Priority::Medium,
                            SystemEvent::ConnNotify {
                                peer_id: peer.id,
                                up: true,
                            },
                        )
                        .await;
                }
                Err(e) => {
                    debug!(channel = name, peer = peer.id, "connect failed: {e}");
                    counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    metrics::RECONNECTS_TOTAL.inc();
                    tokio::time::sleep(cfg.reconnect_interval).await;
                    let _ = events.post(Priority::Medium, SystemEvent::Reconnect).await;
                }
            }
        });
    }

    /// Installs sessions handed over by the accept/connect tasks. Invoked
    /// by the service when it sees `ConnNotify { up: true }`. Returns the
    /// peers whose sessions were (re)installed.
    pub fn install_pending(&mut self) -> Vec<PeerId> {
        let mut installed = Vec::new();
        while let Ok(handle) = self.pending_rx.try_recv() {
            let peer_id = handle.peer_id();
            let slot = peer_id as usize;
            if let Some(old) = self.sessions[slot].take() {
                debug!(channel = self.name, peer = peer_id, "replacing stale session");
                old.close();
            }
            self.sessions[slot] = Some(handle);
            self.connecting[slot] = false;
            installed.push(peer_id);
        }
        metrics::CONNECTED_PEERS.set(self.connected_peers().len() as f64);
        installed
    }

    /// Tears down the session of one peer. On a started slave this arms
    /// the reconnect timer; the master simply waits for the slave to come
    /// back.
    pub fn session_down(&mut self, peer: PeerId) {
        let slot = peer as usize;
        if slot >= self.sessions.len() {
            return;
        }
        if let Some(session) = self.sessions[slot].take() {
            session.close();
        }
        self.connecting[slot] = false;
        metrics::CONNECTED_PEERS.set(self.connected_peers().len() as f64);

        if self.role == Role::Slave && self.is_started() {
            self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::RECONNECTS_TOTAL.inc();
            let events = self.events.clone();
            // Jitter keeps both channels from hammering the master in
            // lockstep after it restarts.
            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..300));
            let interval = self.cfg.reconnect_interval + jitter;
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                let _ = events.post(Priority::Medium, SystemEvent::Reconnect).await;
            });
        }
    }

    /// Handles the reconnect timer event by re-invoking `start`.
    pub fn reconnect(&mut self) -> Result<(), MlagError> {
        if !self.is_started() {
            return Ok(());
        }
        // A connect attempt that ended in a timer event is no longer in
        // flight, whatever the flag says.
        for (idx, session) in self.sessions.iter().enumerate() {
            if session.is_none() {
                self.connecting[idx] = false;
            }
        }
        self.start()
    }

    /// Stops the channel: rejects new connections, closes every session.
    pub fn stop(&mut self) {
        self.is_started.store(false, Ordering::Relaxed);
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for slot in self.sessions.iter_mut() {
            if let Some(session) = slot.take() {
                session.close();
            }
        }
        self.connecting = [false; MAX_PEERS];
        metrics::CONNECTED_PEERS.set(0.0);
        info!(channel = self.name, "channel stopped");
    }

    /// Sends one PDU to one peer.
    pub async fn send(&self, peer: PeerId, pdu: Pdu) -> Result<(), MlagError> {
        if !self.is_started() {
            return Err(MlagError::NotReady);
        }
        let session = self
            .sessions
            .get(peer as usize)
            .and_then(|s| s.as_ref())
            .ok_or(MlagError::PeerNotConnected(peer))?;
        session.send(pdu).await?;
        metrics::PDUS_SENT_TOTAL.with_label_values(&[self.name]).inc();
        Ok(())
    }

    /// Sends one PDU to every peer in `peers` that has a session. Peers
    /// without a session are skipped; the flush/peer-down reconciliation
    /// paths own that consistency.
    pub async fn broadcast(&self, peers: PeerSet, pdu: Pdu) -> Result<(), MlagError> {
        for peer in peers.iter() {
            if peer as usize >= self.sessions.len() || self.sessions[peer as usize].is_none() {
                continue;
            }
            self.send(peer, pdu.clone()).await?;
        }
        Ok(())
    }
}

/// Maps an accepted connection to a peer slot. Matching is by source
/// address first; when peers share an address (loopback deployments) the
/// first sessionless remote slot wins.
fn classify_peer(peers: &[PeerConfig], local_peer: PeerId, remote: SocketAddr) -> Option<PeerId> {
    let remote_ip = remote.ip().to_string();
    if let Some(peer) = peers
        .iter()
        .find(|p| p.id != local_peer && p.addr == remote_ip)
    {
        return Some(peer.id);
    }
    peers.iter().find(|p| p.id != local_peer).map(|p| p.id)
}
