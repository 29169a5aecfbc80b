// src/core/port/remote_fsm.rs

//! The remote-peers view of one MLAG port.
//!
//! Drives the port's isolation from the IPL: while every remote peer can
//! forward (`RemotesUp`) the port is isolated so IPL traffic never egresses
//! through it; when a remote fails (`RemoteFault`) the isolation is lifted
//! and the IPL becomes a legal fallback path. The `isolated` flag guards
//! against double programming.

use crate::core::errors::MlagError;
use crate::core::hal::Hal;
use crate::core::types::{PeerId, PeerSet, PortId};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum RemoteState {
    Idle,
    GlobalDown,
    RemoteFault,
    RemotesUp,
}

/// The remote slices of the port's bitmaps, computed by the caller from the
/// port entry and the local peer slot.
#[derive(Debug, Clone, Copy)]
pub struct RemoteView {
    /// Remote peers that configured the port.
    pub configured: PeerSet,
    /// Remote peers reporting their link up.
    pub oper_up: PeerSet,
}

impl RemoteView {
    pub fn new(configured: PeerSet, oper_up: PeerSet, local_peer: PeerId) -> Self {
        Self {
            configured: configured.without(local_peer),
            oper_up: oper_up.without(local_peer),
        }
    }

    fn all_remotes_deleted(&self) -> bool {
        self.configured.is_empty()
    }

    fn all_remotes_up(&self) -> bool {
        !self.configured.is_empty() && self.oper_up == self.configured
    }

    /// Would every remote be up if `peer`'s pending transition were already
    /// applied to the bitmap?
    fn conditioned_up(&self, peer: PeerId) -> bool {
        !self.configured.is_empty() && self.oper_up.with(peer) == self.configured
    }
}

#[derive(Debug)]
pub struct PortRemoteFsm {
    port_id: PortId,
    state: RemoteState,
    isolated: bool,
}

impl PortRemoteFsm {
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            state: RemoteState::Idle,
            isolated: false,
        }
    }

    pub fn state(&self) -> RemoteState {
        self.state
    }

    pub fn is_isolated(&self) -> bool {
        self.isolated
    }

    /// A peer (local or remote) configured the port.
    pub fn port_add(&mut self) {
        if self.state == RemoteState::Idle {
            self.state = RemoteState::GlobalDown;
        }
    }

    pub fn port_global_enable(&mut self, view: RemoteView, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            RemoteState::GlobalDown => {
                if view.all_remotes_up() {
                    self.transition(RemoteState::RemotesUp, hal)
                } else {
                    self.transition(RemoteState::RemoteFault, hal)
                }
            }
            _ => Ok(()),
        }
    }

    pub fn port_global_disable(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            RemoteState::RemoteFault | RemoteState::RemotesUp => {
                self.transition(RemoteState::GlobalDown, hal)
            }
            _ => Ok(()),
        }
    }

    pub fn port_global_down(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        self.port_global_disable(hal)
    }

    /// A remote peer reported its link up. The view holds the bitmaps as
    /// they were before this transition; the caller applies it afterwards.
    pub fn peer_port_up(
        &mut self,
        peer: PeerId,
        view: RemoteView,
        hal: &dyn Hal,
    ) -> Result<(), MlagError> {
        match self.state {
            RemoteState::RemoteFault if view.conditioned_up(peer) => {
                self.transition(RemoteState::RemotesUp, hal)
            }
            RemoteState::RemotesUp if !view.conditioned_up(peer) => {
                self.transition(RemoteState::RemoteFault, hal)
            }
            _ => Ok(()),
        }
    }

    /// A remote peer reported its link down.
    pub fn peer_port_down(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            RemoteState::RemotesUp => self.transition(RemoteState::RemoteFault, hal),
            _ => Ok(()),
        }
    }

    /// A remote peer dropped out entirely. Its bits are already cleared
    /// from the view.
    pub fn peer_down(&mut self, view: RemoteView, hal: &dyn Hal) -> Result<(), MlagError> {
        self.reevaluate(view, hal)
    }

    /// A remote peer became active again.
    pub fn peer_enable(&mut self, view: RemoteView, hal: &dyn Hal) -> Result<(), MlagError> {
        self.reevaluate(view, hal)
    }

    /// A peer deleted the port. Falls back to Idle once no remote is left.
    pub fn port_del(&mut self, view: RemoteView, hal: &dyn Hal) -> Result<(), MlagError> {
        if self.state != RemoteState::Idle && view.all_remotes_deleted() {
            self.transition(RemoteState::Idle, hal)?;
        }
        Ok(())
    }

    fn reevaluate(&mut self, view: RemoteView, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            RemoteState::RemoteFault if view.all_remotes_up() => {
                self.transition(RemoteState::RemotesUp, hal)
            }
            RemoteState::RemotesUp if !view.all_remotes_up() => {
                self.transition(RemoteState::RemoteFault, hal)
            }
            _ => Ok(()),
        }
    }

    fn transition(&mut self, next: RemoteState, hal: &dyn Hal) -> Result<(), MlagError> {
        if self.state == next {
            return Ok(());
        }
        let prev = self.state;
        self.state = next;
        match next {
            RemoteState::RemotesUp => {
                if !self.isolated {
                    hal.isolation_set(self.port_id)?;
                    self.isolated = true;
                }
            }
            RemoteState::RemoteFault => {
                if self.isolated {
                    hal.isolation_clear(self.port_id)?;
                    self.isolated = false;
                }
            }
            // The fault exit action re-asserts isolation even toward
            // GlobalDown; the port stays isolated while globally down.
            RemoteState::GlobalDown => {
                if prev == RemoteState::RemoteFault && !self.isolated {
                    hal.isolation_set(self.port_id)?;
                    self.isolated = true;
                }
            }
            RemoteState::Idle => {
                if self.isolated {
                    hal.isolation_clear(self.port_id)?;
                    self.isolated = false;
                }
            }
        }
        Ok(())
    }
}
