// src/core/errors.rs

//! Defines the primary error type for the entire daemon.

use crate::core::types::PeerId;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the
/// control plane. Using `thiserror` allows for clean error definitions and
/// automatic `From` trait implementations.
///
/// The dispatcher logs and swallows every kind except `Cancelled`, which is
/// the clean-termination sentinel of an event loop, and any error raised
/// during `init`, which aborts startup.
#[derive(Error, Debug)]
pub enum MlagError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Lookup miss. Locally recoverable; logged at info level.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation attempted before `start` / `peer_start` completed.
    #[error("module not started")]
    NotReady,

    /// A bounded pool or table is full. Surfaces as a deny decision on
    /// learn notifications or as a dropped flush request.
    #[error("capacity exhausted: {0}")]
    Capacity(&'static str),

    /// Dispatcher termination sentinel. Not a failure.
    #[error("dispatcher cancelled")]
    Cancelled,

    /// Malformed or truncated PDU on the wire.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Indicates a code bug, e.g. an unknown opcode on a registered
    /// channel. Logged at error level.
    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("peer {0} has no established session")]
    PeerNotConnected(PeerId),

    #[error("configuration error: {0}")]
    Config(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for MlagError {
    fn clone(&self) -> Self {
        match self {
            MlagError::Io(e) => MlagError::Io(Arc::clone(e)),
            MlagError::NotFound(s) => MlagError::NotFound(s.clone()),
            MlagError::NotReady => MlagError::NotReady,
            MlagError::Capacity(s) => MlagError::Capacity(s),
            MlagError::Cancelled => MlagError::Cancelled,
            MlagError::Protocol(s) => MlagError::Protocol(s.clone()),
            MlagError::Invariant(s) => MlagError::Invariant(s.clone()),
            MlagError::PeerNotConnected(p) => MlagError::PeerNotConnected(*p),
            MlagError::Config(s) => MlagError::Config(s.clone()),
        }
    }
}

impl PartialEq for MlagError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (MlagError::Io(e1), MlagError::Io(e2)) => e1.to_string() == e2.to_string(),
            (MlagError::NotFound(s1), MlagError::NotFound(s2)) => s1 == s2,
            (MlagError::Capacity(s1), MlagError::Capacity(s2)) => s1 == s2,
            (MlagError::Protocol(s1), MlagError::Protocol(s2)) => s1 == s2,
            (MlagError::Invariant(s1), MlagError::Invariant(s2)) => s1 == s2,
            (MlagError::PeerNotConnected(p1), MlagError::PeerNotConnected(p2)) => p1 == p2,
            (MlagError::Config(s1), MlagError::Config(s2)) => s1 == s2,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl From<std::io::Error> for MlagError {
    fn from(e: std::io::Error) -> Self {
        MlagError::Io(Arc::new(e))
    }
}

impl MlagError {
    /// True for the sentinel that ends a dispatcher loop cleanly.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MlagError::Cancelled)
    }
}
