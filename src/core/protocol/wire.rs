// src/core/protocol/wire.rs

//! PDU bodies and their per-opcode wire conversion.
//!
//! Every multi-byte scalar is big-endian on the wire. MAC addresses are six
//! raw bytes, vids are 16 bits, port ids are 32 bits on the wire (the
//! in-memory 64-bit values are truncated for transport). Each opcode owns a
//! matched encode/decode pair; the codec swaps only the leading opcode and
//! delegates the body to the routine registered for it here.

use crate::core::errors::MlagError;
use crate::core::protocol::opcode::Opcode;
use crate::core::types::{FdbEntryType, MacAddr, PeerId, Vid};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Operational link state as carried in oper-update PDUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortOperState {
    Down,
    Up,
}

impl PortOperState {
    pub fn is_up(self) -> bool {
        matches!(self, PortOperState::Up)
    }

    fn to_wire(self) -> u8 {
        match self {
            PortOperState::Down => 0,
            PortOperState::Up => 1,
        }
    }

    fn from_wire(raw: u8) -> Result<Self, MlagError> {
        match raw {
            0 => Ok(PortOperState::Down),
            1 => Ok(PortOperState::Up),
            other => Err(MlagError::Protocol(format!("bad oper state {other}"))),
        }
    }
}

/// The master's fused per-port verdict, broadcast to every peer and posted
/// locally so all stacks react identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalPortState {
    Disabled,
    Enabled,
    OperDown,
    OperUp,
}

impl GlobalPortState {
    fn to_wire(self) -> u8 {
        match self {
            GlobalPortState::Disabled => 0,
            GlobalPortState::Enabled => 1,
            GlobalPortState::OperDown => 2,
            GlobalPortState::OperUp => 3,
        }
    }

    fn from_wire(raw: u8) -> Result<Self, MlagError> {
        match raw {
            0 => Ok(GlobalPortState::Disabled),
            1 => Ok(GlobalPortState::Enabled),
            2 => Ok(GlobalPortState::OperDown),
            3 => Ok(GlobalPortState::OperUp),
            other => Err(MlagError::Protocol(format!("bad global state {other}"))),
        }
    }
}

/// Body of `PortsSync` and `PortsUpdate` (same shape, two opcodes): a batch
/// of MLAG port ids added or deleted by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortListPdu {
    pub del_ports: bool,
    pub mlag_id: PeerId,
    pub port_ids: Vec<u32>,
}

/// Body of `PortsOperUpdate`: per-port operational states of a peer,
/// streamed master→slave during peer sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortsOperUpdatePdu {
    pub mlag_id: PeerId,
    pub states: Vec<(u32, PortOperState)>,
}

/// Body of `PortGlobalState`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortGlobalStatePdu {
    pub states: Vec<(u32, GlobalPortState)>,
}

/// Body of `PeerPortOperChange`: one link transition, peer→master and
/// master→peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerPortOperChangePdu {
    pub mlag_id: PeerId,
    pub port_id: u32,
    pub state: PortOperState,
    pub is_ipl: bool,
}

/// Body shared by the three sync-progress opcodes (`PortsSyncDone`,
/// `PortsSyncFinish`, `MasterSyncDone`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncDonePdu {
    pub peer_id: PeerId,
    pub state: u8,
    pub sync_type: u8,
}

/// One learn record as carried in learn batches and the full-FDB export.
/// `port_cookie` preserves the true port id when `port` holds the non-MLAG
/// sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacLearnEntry {
    pub vid: Vid,
    pub mac: MacAddr,
    pub port: u32,
    pub entry_type: FdbEntryType,
    pub port_cookie: u32,
    pub originator: PeerId,
}

const MAC_LEARN_ENTRY_WIRE: usize = 2 + 6 + 4 + 1 + 4 + 1;

/// Body of `MacLocalLearn`, `MacGlobalLearn` and (with a 32-bit count) the
/// `AllFdbExport` snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacLearnBatch {
    pub entries: Vec<MacLearnEntry>,
}

/// One age record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacAgeEntry {
    pub vid: Vid,
    pub mac: MacAddr,
    pub originator: PeerId,
}

const MAC_AGE_ENTRY_WIRE: usize = 2 + 6 + 1;

/// Body of `MacLocalAge` and `MacGlobalAge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacAgeBatch {
    pub entries: Vec<MacAgeEntry>,
}

/// The flush scope filter. When neither flag is set the flush is global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyFilter {
    pub by_vid: bool,
    pub by_port: bool,
    pub vid: Vid,
    pub port: u32,
}

/// Body of `FlushPeerStart` and `FlushMasterStart`. The mac list is only
/// populated for non-MLAG-port flushes, where the remote peer must delete
/// individual entries it cannot match by port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushRequestPdu {
    pub filter: KeyFilter,
    pub origin_peer: PeerId,
    pub non_mlag: bool,
    pub macs: Vec<(Vid, MacAddr)>,
}

/// Body of `FlushAck`: the packed flush key being acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushAckPdu {
    pub key: u64,
    pub peer_id: PeerId,
}

/// A decoded PDU, one variant per opcode.
#[derive(Debug, Clone, PartialEq)]
pub enum Pdu {
    PortsSync(PortListPdu),
    PortsUpdate(PortListPdu),
    PortsOperUpdate(PortsOperUpdatePdu),
    PortGlobalState(PortGlobalStatePdu),
    PeerPortOperChange(PeerPortOperChangePdu),
    PortsSyncDone(SyncDonePdu),
    PortsSyncFinish(SyncDonePdu),
    MasterSyncDone(SyncDonePdu),
    MacLocalLearn(MacLearnBatch),
    MacLocalAge(MacAgeBatch),
    MacGlobalLearn(MacLearnBatch),
    MacGlobalAge(MacAgeBatch),
    FlushPeerStart(FlushRequestPdu),
    FlushMasterStart(FlushRequestPdu),
    FlushAck(FlushAckPdu),
    AllFdbGet { peer_id: PeerId },
    AllFdbExport(MacLearnBatch),
}

impl Pdu {
    pub fn opcode(&self) -> Opcode {
        match self {
            Pdu::PortsSync(_) => Opcode::PortsSync,
            Pdu::PortsUpdate(_) => Opcode::PortsUpdate,
            Pdu::PortsOperUpdate(_) => Opcode::PortsOperUpdate,
            Pdu::PortGlobalState(_) => Opcode::PortGlobalState,
            Pdu::PeerPortOperChange(_) => Opcode::PeerPortOperChange,
            Pdu::PortsSyncDone(_) => Opcode::PortsSyncDone,
            Pdu::PortsSyncFinish(_) => Opcode::PortsSyncFinish,
            Pdu::MasterSyncDone(_) => Opcode::MasterSyncDone,
            Pdu::MacLocalLearn(_) => Opcode::MacLocalLearn,
            Pdu::MacLocalAge(_) => Opcode::MacLocalAge,
            Pdu::MacGlobalLearn(_) => Opcode::MacGlobalLearn,
            Pdu::MacGlobalAge(_) => Opcode::MacGlobalAge,
            Pdu::FlushPeerStart(_) => Opcode::FlushPeerStart,
            Pdu::FlushMasterStart(_) => Opcode::FlushMasterStart,
            Pdu::FlushAck(_) => Opcode::FlushAck,
            Pdu::AllFdbGet { .. } => Opcode::AllFdbGet,
            Pdu::AllFdbExport(_) => Opcode::AllFdbExport,
        }
    }

    /// Serializes the body (everything after the opcode) in network order.
    pub fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            Pdu::PortsSync(p) | Pdu::PortsUpdate(p) => {
                dst.put_u8(p.del_ports as u8);
                dst.put_u8(p.mlag_id);
                dst.put_u16(p.port_ids.len() as u16);
                for id in &p.port_ids {
                    dst.put_u32(*id);
                }
            }
            Pdu::PortsOperUpdate(p) => {
                dst.put_u8(p.mlag_id);
                dst.put_u16(p.states.len() as u16);
                for (port, oper) in &p.states {
                    dst.put_u32(*port);
                    dst.put_u8(oper.to_wire());
                }
            }
            Pdu::PortGlobalState(p) => {
                dst.put_u16(p.states.len() as u16);
                for (port, state) in &p.states {
                    dst.put_u32(*port);
                    dst.put_u8(state.to_wire());
                }
            }
            Pdu::PeerPortOperChange(p) => {
                dst.put_u8(p.mlag_id);
                dst.put_u32(p.port_id);
                dst.put_u8(p.state.to_wire());
                dst.put_u8(p.is_ipl as u8);
            }
            Pdu::PortsSyncDone(p) | Pdu::PortsSyncFinish(p) | Pdu::MasterSyncDone(p) => {
                dst.put_u8(p.peer_id);
                dst.put_u8(p.state);
                dst.put_u8(p.sync_type);
            }
            Pdu::MacLocalLearn(b) | Pdu::MacGlobalLearn(b) => {
                dst.put_u16(b.entries.len() as u16);
                for e in &b.entries {
                    encode_learn_entry(e, dst);
                }
            }
            Pdu::MacLocalAge(b) | Pdu::MacGlobalAge(b) => {
                dst.put_u16(b.entries.len() as u16);
                for e in &b.entries {
                    dst.put_u16(e.vid);
                    dst.put_slice(&e.mac.0);
                    dst.put_u8(e.originator);
                }
            }
            Pdu::FlushPeerStart(p) | Pdu::FlushMasterStart(p) => {
                dst.put_u8(p.filter.by_vid as u8);
                dst.put_u8(p.filter.by_port as u8);
                dst.put_u16(p.filter.vid);
                dst.put_u32(p.filter.port);
                dst.put_u8(p.origin_peer);
                dst.put_u8(p.non_mlag as u8);
                dst.put_u16(p.macs.len() as u16);
                for (vid, mac) in &p.macs {
                    dst.put_u16(*vid);
                    dst.put_slice(&mac.0);
                }
            }
            Pdu::FlushAck(p) => {
                dst.put_u64(p.key);
                dst.put_u8(p.peer_id);
            }
            Pdu::AllFdbGet { peer_id } => {
                dst.put_u8(*peer_id);
            }
            Pdu::AllFdbExport(b) => {
                dst.put_u32(b.entries.len() as u32);
                for e in &b.entries {
                    encode_learn_entry(e, dst);
                }
            }
        }
    }

    /// Deserializes a body of `opcode` from a complete payload buffer.
    pub fn decode_body(opcode: Opcode, mut buf: Bytes) -> Result<Pdu, MlagError> {
        let pdu = match opcode {
            Opcode::PortsSync | Opcode::PortsUpdate => {
                need(&buf, 4, opcode)?;
                let del_ports = buf.get_u8() != 0;
                let mlag_id = buf.get_u8();
                let n = buf.get_u16() as usize;
                need(&buf, n * 4, opcode)?;
                let mut port_ids = Vec::with_capacity(n);
                for _ in 0..n {
                    port_ids.push(buf.get_u32());
                }
                let body = PortListPdu {
                    del_ports,
                    mlag_id,
                    port_ids,
                };
                if opcode == Opcode::PortsSync {
                    Pdu::PortsSync(body)
                } else {
                    Pdu::PortsUpdate(body)
                }
            }
            Opcode::PortsOperUpdate => {
                need(&buf, 3, opcode)?;
                let mlag_id = buf.get_u8();
                let n = buf.get_u16() as usize;
                need(&buf, n * 5, opcode)?;
                let mut states = Vec::with_capacity(n);
                for _ in 0..n {
                    let port = buf.get_u32();
                    let oper = PortOperState::from_wire(buf.get_u8())?;
                    states.push((port, oper));
                }
                Pdu::PortsOperUpdate(PortsOperUpdatePdu { mlag_id, states })
            }
            Opcode::PortGlobalState => {
                need(&buf, 2, opcode)?;
                let n = buf.get_u16() as usize;
                need(&buf, n * 5, opcode)?;
                let mut states = Vec::with_capacity(n);
                for _ in 0..n {
                    let port = buf.get_u32();
                    let state = GlobalPortState::from_wire(buf.get_u8())?;
                    states.push((port, state));
                }
                Pdu::PortGlobalState(PortGlobalStatePdu { states })
            }
            Opcode::PeerPortOperChange => {
                need(&buf, 7, opcode)?;
                Pdu::PeerPortOperChange(PeerPortOperChangePdu {
                    mlag_id: buf.get_u8(),
                    port_id: buf.get_u32(),
                    state: PortOperState::from_wire(buf.get_u8())?,
                    is_ipl: buf.get_u8() != 0,
                })
            }
            Opcode::PortsSyncDone | Opcode::PortsSyncFinish | Opcode::MasterSyncDone => {
                need(&buf, 3, opcode)?;
                let body = SyncDonePdu {
                    peer_id: buf.get_u8(),
                    state: buf.get_u8(),
                    sync_type: buf.get_u8(),
                };
                match opcode {
                    Opcode::PortsSyncDone => Pdu::PortsSyncDone(body),
                    Opcode::PortsSyncFinish => Pdu::PortsSyncFinish(body),
                    _ => Pdu::MasterSyncDone(body),
                }
            }
            Opcode::MacLocalLearn | Opcode::MacGlobalLearn => {
                need(&buf, 2, opcode)?;
                let n = buf.get_u16() as usize;
                need(&buf, n * MAC_LEARN_ENTRY_WIRE, opcode)?;
                let mut entries = Vec::with_capacity(n);
                for _ in 0..n {
                    entries.push(decode_learn_entry(&mut buf)?);
                }
                let body = MacLearnBatch { entries };
                if opcode == Opcode::MacLocalLearn {
                    Pdu::MacLocalLearn(body)
                } else {
                    Pdu::MacGlobalLearn(body)
                }
            }
            Opcode::MacLocalAge | Opcode::MacGlobalAge => {
                need(&buf, 2, opcode)?;
                let n = buf.get_u16() as usize;
                need(&buf, n * MAC_AGE_ENTRY_WIRE, opcode)?;
                let mut entries = Vec::with_capacity(n);
                for _ in 0..n {
                    let vid = buf.get_u16();
                    let mut mac = [0u8; 6];
                    buf.copy_to_slice(&mut mac);
                    let originator = buf.get_u8();
                    entries.push(MacAgeEntry {
                        vid,
                        mac: MacAddr(mac),
                        originator,
                    });
                }
                let body = MacAgeBatch { entries };
                if opcode == Opcode::MacLocalAge {
                    Pdu::MacLocalAge(body)
                } else {
                    Pdu::MacGlobalAge(body)
                }
            }
            Opcode::FlushPeerStart | Opcode::FlushMasterStart => {
                need(&buf, 12, opcode)?;
                let by_vid = buf.get_u8() != 0;
                let by_port = buf.get_u8() != 0;
                let vid = buf.get_u16();
                let port = buf.get_u32();
                let origin_peer = buf.get_u8();
                let non_mlag = buf.get_u8() != 0;
                let n = buf.get_u16() as usize;
                need(&buf, n * 8, opcode)?;
                let mut macs = Vec::with_capacity(n);
                for _ in 0..n {
                    let vid = buf.get_u16();
                    let mut mac = [0u8; 6];
                    buf.copy_to_slice(&mut mac);
                    macs.push((vid, MacAddr(mac)));
                }
                let body = FlushRequestPdu {
                    filter: KeyFilter {
                        by_vid,
                        by_port,
                        vid,
                        port,
                    },
                    origin_peer,
                    non_mlag,
                    macs,
                };
                if opcode == Opcode::FlushPeerStart {
                    Pdu::FlushPeerStart(body)
                } else {
                    Pdu::FlushMasterStart(body)
                }
            }
            Opcode::FlushAck => {
                need(&buf, 9, opcode)?;
                Pdu::FlushAck(FlushAckPdu {
                    key: buf.get_u64(),
                    peer_id: buf.get_u8(),
                })
            }
            Opcode::AllFdbGet => {
                need(&buf, 1, opcode)?;
                Pdu::AllFdbGet {
                    peer_id: buf.get_u8(),
                }
            }
            Opcode::AllFdbExport => {
                need(&buf, 4, opcode)?;
                let n = buf.get_u32() as usize;
                need(&buf, n * MAC_LEARN_ENTRY_WIRE, opcode)?;
                let mut entries = Vec::with_capacity(n);
                for _ in 0..n {
                    entries.push(decode_learn_entry(&mut buf)?);
                }
                Pdu::AllFdbExport(MacLearnBatch { entries })
            }
        };
        if buf.has_remaining() {
            return Err(MlagError::Protocol(format!(
                "{} payload has {} trailing bytes",
                opcode.name(),
                buf.remaining()
            )));
        }
        Ok(pdu)
    }

    /// Computes the total payload length of `opcode` from the payload
    /// prefix available so far. Returns `None` when the count fields have
    /// not arrived yet. This is how the receiver knows whether the fixed or
    /// the jumbo buffer is being consumed.
    pub fn body_len(opcode: Opcode, buf: &[u8]) -> Option<usize> {
        fn count_at(buf: &[u8], offset: usize) -> Option<usize> {
            if buf.len() < offset + 2 {
                return None;
            }
            Some(u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize)
        }

        match opcode {
            Opcode::PortsSync | Opcode::PortsUpdate => Some(4 + 4 * count_at(buf, 2)?),
            Opcode::PortsOperUpdate => Some(3 + 5 * count_at(buf, 1)?),
            Opcode::PortGlobalState => Some(2 + 5 * count_at(buf, 0)?),
            Opcode::PeerPortOperChange => Some(7),
            Opcode::PortsSyncDone | Opcode::PortsSyncFinish | Opcode::MasterSyncDone => Some(3),
            Opcode::MacLocalLearn | Opcode::MacGlobalLearn => {
                Some(2 + MAC_LEARN_ENTRY_WIRE * count_at(buf, 0)?)
            }
            Opcode::MacLocalAge | Opcode::MacGlobalAge => {
                Some(2 + MAC_AGE_ENTRY_WIRE * count_at(buf, 0)?)
            }
            Opcode::FlushPeerStart | Opcode::FlushMasterStart => Some(12 + 8 * count_at(buf, 10)?),
            Opcode::FlushAck => Some(9),
            Opcode::AllFdbGet => Some(1),
            Opcode::AllFdbExport => {
                if buf.len() < 4 {
                    return None;
                }
                let n = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                Some(4 + MAC_LEARN_ENTRY_WIRE * n)
            }
        }
    }

    /// A convenience method to encode a full frame into a `Vec<u8>`.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(self.opcode() as u16);
        self.encode_body(&mut buf);
        buf.to_vec()
    }
}

fn encode_learn_entry(e: &MacLearnEntry, dst: &mut BytesMut) {
    dst.put_u16(e.vid);
    dst.put_slice(&e.mac.0);
    dst.put_u32(e.port);
    dst.put_u8(e.entry_type.to_wire());
    dst.put_u32(e.port_cookie);
    dst.put_u8(e.originator);
}

fn decode_learn_entry(buf: &mut Bytes) -> Result<MacLearnEntry, MlagError> {
    let vid = buf.get_u16();
    let mut mac = [0u8; 6];
    buf.copy_to_slice(&mut mac);
    let port = buf.get_u32();
    let raw_type = buf.get_u8();
    let entry_type = FdbEntryType::from_wire(raw_type)
        .ok_or_else(|| MlagError::Protocol(format!("bad fdb entry type {raw_type}")))?;
    let port_cookie = buf.get_u32();
    let originator = buf.get_u8();
    Ok(MacLearnEntry {
        vid,
        mac: MacAddr(mac),
        port,
        entry_type,
        port_cookie,
        originator,
    })
}

fn need(buf: &Bytes, len: usize, opcode: Opcode) -> Result<(), MlagError> {
    if buf.remaining() < len {
        return Err(MlagError::Protocol(format!(
            "truncated {} payload: need {}, have {}",
            opcode.name(),
            len,
            buf.remaining()
        )));
    }
    Ok(())
}
