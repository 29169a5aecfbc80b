// src/core/comm/session.rs

//! One established TCP session with a peer: a framed writer shared behind a
//! mutex and a reader task that feeds decoded PDUs into the owning
//! service's dispatcher.

use crate::core::dispatcher::PduEnvelope;
use crate::core::errors::MlagError;
use crate::core::events::{EventBus, Priority, SystemEvent};
use crate::core::protocol::{Pdu, PduCodec};
use crate::core::types::PeerId;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::wrapper::WrapperCounters;

/// Whether concurrent sends on a session serialize behind the socket
/// mutex. `Lock` is required on the mac-sync channel, where jumbo payloads
/// interleaving would corrupt framing; the control channel runs `NoLock`
/// and trusts its single-caller discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtection {
    Lock,
    NoLock,
}

/// A live session with one peer.
pub struct SessionHandle {
    peer_id: PeerId,
    protection: SocketProtection,
    writer: Arc<Mutex<FramedWrite<OwnedWriteHalf, PduCodec>>>,
    reader_task: JoinHandle<()>,
    counters: Arc<WrapperCounters>,
}

impl SessionHandle {
    /// Splits the stream, spawns the reader task, and returns the handle.
    /// The reader forwards every decoded PDU into `pdu_tx` and posts a
    /// `ConnNotify { up: false }` when the session dies.
    pub fn spawn(
        peer_id: PeerId,
        stream: TcpStream,
        protection: SocketProtection,
        max_pdu_len: usize,
        pdu_tx: mpsc::Sender<PduEnvelope>,
        events: EventBus,
        counters: Arc<WrapperCounters>,
    ) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(FramedWrite::new(
            write_half,
            PduCodec::new(max_pdu_len),
        )));

        let reader_counters = counters.clone();
        let reader_task = tokio::spawn(async move {
            let mut framed = FramedRead::new(read_half, PduCodec::new(max_pdu_len));
            loop {
                match framed.next().await {
                    Some(Ok(pdu)) => {
                        reader_counters.rx_msg.fetch_add(1, Ordering::Relaxed);
                        if pdu_tx
                            .send(PduEnvelope { peer_id, pdu })
                            .await
                            .is_err()
                        {
                            debug!(peer = peer_id, "dispatcher gone, closing reader");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(peer = peer_id, "session receive error: {e}");
                        reader_counters.protocol_errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    None => {
                        info!(peer = peer_id, "session closed by peer");
                        break;
                    }
                }
            }
            let _ = events
                .post(
                    Priority::Medium,
                    SystemEvent::ConnNotify {
                        peer_id,
                        up: false,
                    },
                )
                .await;
        });

        Self {
            peer_id,
            protection,
            writer,
            reader_task,
            counters,
        }
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Sends one PDU. With `Lock` protection concurrent callers serialize;
    /// with `NoLock` a contended socket is an invariant violation, because
    /// that channel promises a single sending context.
    pub async fn send(&self, pdu: Pdu) -> Result<(), MlagError> {
        let mut writer = match self.protection {
            SocketProtection::Lock => self.writer.lock().await,
            SocketProtection::NoLock => self.writer.try_lock().map_err(|_| {
                MlagError::Invariant(format!(
                    "concurrent send on unprotected session to peer {}",
                    self.peer_id
                ))
            })?,
        };
        writer.send(pdu).await?;
        self.counters.tx_msg.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Tears the session down. The writer closes when the last Arc drops;
    /// the reader task is aborted in place.
    pub fn close(&self) {
        self.reader_task.abort();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
