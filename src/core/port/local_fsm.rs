// src/core/port/local_fsm.rs

//! The local-peer view of one MLAG port.
//!
//! Owns the port's admin state at the HAL and the IPL redirect that keeps
//! traffic flowing while the local link is down but a remote link is up:
//! entering `LocalFault` installs the redirect, leaving it removes it.

use crate::core::errors::MlagError;
use crate::core::hal::Hal;
use crate::core::types::PortId;
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LocalState {
    Idle,
    GlobalDown,
    LocalFault,
    LocalUp,
}

#[derive(Debug)]
pub struct PortLocalFsm {
    port_id: PortId,
    state: LocalState,
    /// Cached link state; updated in every state so the enable guard sees
    /// the latest transition even while the port is globally down.
    oper_up: bool,
    admin_up: bool,
    redirect_installed: bool,
}

impl PortLocalFsm {
    pub fn new(port_id: PortId) -> Self {
        Self {
            port_id,
            state: LocalState::Idle,
            oper_up: false,
            admin_up: false,
            redirect_installed: false,
        }
    }

    pub fn state(&self) -> LocalState {
        self.state
    }

    pub fn oper_up(&self) -> bool {
        self.oper_up
    }

    pub fn admin_up(&self) -> bool {
        self.admin_up
    }

    /// This peer configured the port.
    pub fn port_add(&mut self) {
        if self.state == LocalState::Idle {
            self.admin_up = false;
            self.state = LocalState::GlobalDown;
        }
    }

    /// Master granted global enable: admin-enable at the HAL and pick the
    /// branch matching the cached link state.
    pub fn port_global_enable(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            LocalState::GlobalDown => {
                hal.port_admin_set(self.port_id, true)?;
                self.admin_up = true;
                if self.oper_up {
                    self.transition(LocalState::LocalUp, hal)
                } else {
                    self.transition(LocalState::LocalFault, hal)
                }
            }
            _ => Ok(()),
        }
    }

    /// Master's fused oper state went up while we were globally down; same
    /// branch selection as enable, without touching the admin state.
    pub fn port_global_up(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            LocalState::GlobalDown => {
                if self.oper_up {
                    self.transition(LocalState::LocalUp, hal)
                } else {
                    self.transition(LocalState::LocalFault, hal)
                }
            }
            _ => Ok(()),
        }
    }

    /// Master revoked the port: admin-disable and fall back to GlobalDown.
    pub fn port_global_disable(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            LocalState::Idle => Ok(()),
            _ => {
                hal.port_admin_set(self.port_id, false)?;
                self.admin_up = false;
                self.transition(LocalState::GlobalDown, hal)
            }
        }
    }

    /// Master reports every peer oper-down. No admin change.
    pub fn port_global_down(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        match self.state {
            LocalState::LocalFault | LocalState::LocalUp => {
                self.transition(LocalState::GlobalDown, hal)
            }
            _ => Ok(()),
        }
    }

    /// Local link came up.
    pub fn port_up(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        self.oper_up = true;
        match self.state {
            LocalState::LocalFault => self.transition(LocalState::LocalUp, hal),
            _ => Ok(()),
        }
    }

    /// Local link went down.
    pub fn port_down(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        self.oper_up = false;
        match self.state {
            LocalState::LocalUp => self.transition(LocalState::LocalFault, hal),
            _ => Ok(()),
        }
    }

    /// This peer removed the port from its configuration.
    pub fn port_del(&mut self, hal: &dyn Hal) -> Result<(), MlagError> {
        if self.state == LocalState::Idle {
            return Ok(());
        }
        if self.admin_up {
            hal.port_admin_set(self.port_id, false)?;
            self.admin_up = false;
        }
        self.transition(LocalState::Idle, hal)
    }

    fn transition(&mut self, next: LocalState, hal: &dyn Hal) -> Result<(), MlagError> {
        if self.state == next {
            return Ok(());
        }
        // Exit action.
        if self.state == LocalState::LocalFault && self.redirect_installed {
            hal.ipl_redirect_clear(self.port_id)?;
            self.redirect_installed = false;
        }
        self.state = next;
        // Entry action.
        if next == LocalState::LocalFault && !self.redirect_installed {
            hal.ipl_redirect_set(self.port_id)?;
            self.redirect_installed = true;
        }
        Ok(())
    }
}
