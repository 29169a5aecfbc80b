// src/core/dispatcher.rs

//! The single-threaded event loop backing each logical service.
//!
//! A dispatcher owns one service (port manager or mac-sync), its three
//! priority queues, and the PDU receiver fed by the comm wrapper sessions.
//! Handlers run to completion; there is no parallelism inside a service.
//! Scheduling is strict priority between queue levels, with the session
//! receiver slotted between medium and low, and FIFO within each source.

use crate::core::errors::MlagError;
use crate::core::events::{EventQueues, SystemEvent};
use crate::core::metrics;
use crate::core::protocol::{Opcode, Pdu};
use crate::core::types::PeerId;
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// A PDU together with the peer slot whose session delivered it.
#[derive(Debug, Clone)]
pub struct PduEnvelope {
    pub peer_id: PeerId,
    pub pdu: Pdu,
}

/// The opcode table of one service. Local events and wire PDUs route
/// through the same dispatcher, so a single registration covers both; an
/// opcode arriving on a channel that never registered it is a code bug.
#[derive(Debug, Default)]
pub struct CmdDb {
    registered: HashMap<u16, &'static str>,
}

impl CmdDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, opcode: Opcode) {
        self.registered.insert(opcode as u16, opcode.name());
    }

    pub fn is_registered(&self, opcode: Opcode) -> bool {
        self.registered.contains_key(&(opcode as u16))
    }

    pub fn name_of(&self, opcode: Opcode) -> &'static str {
        self.registered
            .get(&(opcode as u16))
            .copied()
            .unwrap_or("UNREGISTERED")
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

/// One logical service driven by a dispatcher loop.
#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    fn cmd_db(&self) -> &CmdDb;

    async fn handle_event(&mut self, event: SystemEvent) -> Result<(), MlagError>;

    async fn handle_pdu(&mut self, from: PeerId, pdu: Pdu) -> Result<(), MlagError>;
}

enum Work {
    Event(SystemEvent),
    Pdu(PduEnvelope),
}

/// Runs the dispatcher loop until a handler returns `Cancelled` or every
/// input source is gone. The service is handed back so callers can inspect
/// or drop its state after a clean deinit.
pub async fn run<S: Service>(
    mut service: S,
    mut queues: EventQueues,
    mut pdu_rx: tokio::sync::mpsc::Receiver<PduEnvelope>,
) -> S {
    info!(service = service.name(), "dispatcher started");

    loop {
        let work = tokio::select! {
            biased;
            Some(ev) = queues.high_rx.recv() => Work::Event(ev),
            Some(ev) = queues.medium_rx.recv() => Work::Event(ev),
            Some(env) = pdu_rx.recv() => Work::Pdu(env),
            Some(ev) = queues.low_rx.recv() => Work::Event(ev),
            else => {
                warn!(service = service.name(), "all dispatcher sources closed");
                break;
            }
        };

        let (result, what) = match work {
            Work::Event(ev) => {
                let name = ev.name();
                debug!(service = service.name(), event = name, "handling event");
                (service.handle_event(ev).await, name)
            }
            Work::Pdu(env) => {
                let opcode = env.pdu.opcode();
                if !service.cmd_db().is_registered(opcode) {
                    error!(
                        service = service.name(),
                        opcode = opcode.name(),
                        "invariant: opcode not registered on this channel"
                    );
                    continue;
                }
                debug!(
                    service = service.name(),
                    peer = env.peer_id,
                    opcode = opcode.name(),
                    "handling PDU"
                );
                metrics::PDUS_RECEIVED_TOTAL
                    .with_label_values(&[service.name()])
                    .inc();
                (
                    service.handle_pdu(env.peer_id, env.pdu).await,
                    opcode.name(),
                )
            }
        };

        match result {
            Ok(()) => {}
            Err(MlagError::Cancelled) => {
                info!(service = service.name(), "dispatcher cancelled");
                break;
            }
            Err(MlagError::NotFound(miss)) => {
                // Lookup misses are routine during teardown races.
                info!(service = service.name(), cmd = what, "{miss} not found");
            }
            Err(e) => {
                error!(service = service.name(), cmd = what, "handler failed: {e}");
            }
        }
    }

    info!(service = service.name(), "dispatcher stopped");
    service
}
