// src/core/port/master_fsm.rs

//! The master-only fusion of all peers' views of one MLAG port.
//!
//! The FSM itself is pure: every event returns the emissions the caller
//! must perform (global-state broadcast, targeted enable sequence, oper
//! forwarding, configuration-change notification). The port manager turns
//! them into PDUs for enabled remote peers and system events for the local
//! stack, so every peer reacts to the same signal.

use crate::core::protocol::wire::GlobalPortState;
use crate::core::types::{PeerId, PeerSet, PortId};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MasterState {
    Idle,
    Disabled,
    GlobalDown,
    GlobalUp,
}

/// An emission requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MasterAction {
    /// PortGlobalState to every enabled remote peer plus the local stack.
    BroadcastGlobalState(GlobalPortState),
    /// PortGlobalState sequence to one peer (the one that just became
    /// active and missed the broadcast).
    SendGlobalStateTo {
        peer: PeerId,
        states: Vec<GlobalPortState>,
    },
    /// PeerPortOperChange forwarded to every peer except the originator.
    ForwardOperChange { origin: PeerId, up: bool },
    /// PortsUpdate configuration change to every peer except the
    /// originator.
    ConfChange { origin: PeerId, deleted: bool },
}

/// The guard inputs of one event: the port's bitmaps after the triggering
/// update, plus current liveness.
#[derive(Debug, Clone, Copy)]
pub struct MasterView {
    /// Peers that have this port configured.
    pub configured: PeerSet,
    /// Peers reporting oper-up for this port.
    pub oper_up: PeerSet,
    /// Peers counting toward the quorum (Enabled or TxEnabled).
    pub active: PeerSet,
}

impl MasterView {
    fn all_peers_active(&self) -> bool {
        !self.configured.is_empty() && self.configured.is_subset_of(self.active)
    }

    fn all_peers_down(&self) -> bool {
        self.configured.is_empty()
    }

    fn all_peers_oper_down(&self) -> bool {
        self.oper_up.is_empty()
    }
}

#[derive(Debug)]
pub struct PortMasterFsm {
    port_id: PortId,
    state: MasterState,
}

impl PortMasterFsm {
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            state: MasterState::Idle,
        }
    }

    pub fn port_id(&self) -> PortId {
        self.port_id
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// Peer `origin` configured the port.
    pub fn port_add(&mut self, origin: PeerId, view: MasterView) -> Vec<MasterAction> {
        match self.state {
            MasterState::Idle | MasterState::Disabled => {
                if view.all_peers_active() {
                    let mut actions = vec![MasterAction::BroadcastGlobalState(
                        GlobalPortState::Enabled,
                    )];
                    actions.extend(self.enter(MasterState::GlobalDown, view));
                    actions
                } else {
                    let mut actions = vec![MasterAction::ConfChange {
                        origin,
                        deleted: false,
                    }];
                    actions.extend(self.enter(MasterState::Disabled, view));
                    actions
                }
            }
            MasterState::GlobalDown | MasterState::GlobalUp => {
                let mut actions = vec![MasterAction::ConfChange {
                    origin,
                    deleted: false,
                }];
                // A peer joining an already-enabled port missed the
                // original broadcast; catch it up directly.
                if view.all_peers_active() {
                    let oper = if self.state == MasterState::GlobalUp {
                        GlobalPortState::OperUp
                    } else {
                        GlobalPortState::OperDown
                    };
                    actions.push(MasterAction::SendGlobalStateTo {
                        peer: origin,
                        states: vec![GlobalPortState::Enabled, oper],
                    });
                }
                actions
            }
        }
    }

    /// Peer `origin` deleted the port. The caller has already cleared its
    /// bits from the view.
    pub fn port_del(&mut self, origin: PeerId, view: MasterView) -> Vec<MasterAction> {
        if self.state == MasterState::Idle {
            return Vec::new();
        }
        let mut actions = vec![MasterAction::ConfChange {
            origin,
            deleted: true,
        }];
        if view.all_peers_down() {
            self.state = MasterState::Idle;
        } else if !view.all_peers_active() {
            actions.extend(self.enter(MasterState::Disabled, view));
        }
        actions
    }

    /// A peer's liveness dropped; its oper bits are already cleared.
    pub fn peer_down(&mut self, view: MasterView) -> Vec<MasterAction> {
        match self.state {
            MasterState::Disabled if view.all_peers_active() => {
                let mut actions =
                    vec![MasterAction::BroadcastGlobalState(GlobalPortState::Enabled)];
                actions.extend(self.enter(MasterState::GlobalDown, view));
                actions
            }
            MasterState::GlobalDown if view.all_peers_down() => {
                self.state = MasterState::Idle;
                Vec::new()
            }
            MasterState::GlobalUp if view.all_peers_oper_down() => {
                self.enter(MasterState::GlobalDown, view)
            }
            _ => Vec::new(),
        }
    }

    /// Peer `peer` became active.
    pub fn peer_active(&mut self, peer: PeerId, view: MasterView) -> Vec<MasterAction> {
        match self.state {
            MasterState::Disabled if view.all_peers_active() => {
                let mut actions =
                    vec![MasterAction::BroadcastGlobalState(GlobalPortState::Enabled)];
                actions.extend(self.enter(MasterState::GlobalDown, view));
                actions
            }
            MasterState::GlobalDown | MasterState::GlobalUp => {
                if view.all_peers_active() {
                    // Catch the newcomer up with enable plus current oper.
                    let oper = if self.state == MasterState::GlobalUp {
                        GlobalPortState::OperUp
                    } else {
                        GlobalPortState::OperDown
                    };
                    vec![MasterAction::SendGlobalStateTo {
                        peer,
                        states: vec![GlobalPortState::Enabled, oper],
                    }]
                } else {
                    self.enter(MasterState::Disabled, view)
                }
            }
            _ => Vec::new(),
        }
    }

    /// Peer `origin` reported its link up; its bit is already set.
    pub fn port_up(&mut self, origin: PeerId, view: MasterView) -> Vec<MasterAction> {
        match self.state {
            MasterState::GlobalDown => {
                let mut actions = vec![MasterAction::ForwardOperChange { origin, up: true }];
                actions.extend(self.enter(MasterState::GlobalUp, view));
                actions
            }
            MasterState::GlobalUp => vec![MasterAction::ForwardOperChange { origin, up: true }],
            _ => Vec::new(),
        }
    }

    /// Peer `origin` reported its link down; its bit is already cleared.
    pub fn port_down(&mut self, origin: PeerId, view: MasterView) -> Vec<MasterAction> {
        match self.state {
            MasterState::GlobalUp => {
                let mut actions = vec![MasterAction::ForwardOperChange { origin, up: false }];
                if view.all_peers_oper_down() {
                    actions.extend(self.enter(MasterState::GlobalDown, view));
                }
                actions
            }
            MasterState::GlobalDown => {
                vec![MasterAction::ForwardOperChange { origin, up: false }]
            }
            _ => Vec::new(),
        }
    }

    /// Drops all master-side state, used on role change.
    pub fn reset(&mut self) {
        self.state = MasterState::Idle;
    }

    fn enter(&mut self, next: MasterState, _view: MasterView) -> Vec<MasterAction> {
        if self.state == next {
            return Vec::new();
        }
        self.state = next;
        match next {
            MasterState::Disabled => vec![MasterAction::BroadcastGlobalState(
                GlobalPortState::Disabled,
            )],
            MasterState::GlobalDown => vec![MasterAction::BroadcastGlobalState(
                GlobalPortState::OperDown,
            )],
            MasterState::GlobalUp => {
                vec![MasterAction::BroadcastGlobalState(GlobalPortState::OperUp)]
            }
            MasterState::Idle => Vec::new(),
        }
    }
}
