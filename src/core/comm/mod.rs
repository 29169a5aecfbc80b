// src/core/comm/mod.rs

//! The reliable, reconnecting TCP substrate between MLAG peers.

pub mod session;
pub mod wrapper;

pub use session::{SessionHandle, SocketProtection};
pub use wrapper::{CommWrapper, WrapperCounters};
