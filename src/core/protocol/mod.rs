// src/core/protocol/mod.rs

//! The peer-to-peer wire protocol: opcodes, PDU bodies, and the framing
//! codec used by both TCP channels.

pub mod codec;
pub mod opcode;
pub mod wire;

pub use codec::PduCodec;
pub use opcode::Opcode;
pub use wire::{
    FlushAckPdu, FlushRequestPdu, GlobalPortState, KeyFilter, MacAgeBatch, MacAgeEntry,
    MacLearnBatch, MacLearnEntry, Pdu, PeerPortOperChangePdu, PortGlobalStatePdu, PortListPdu,
    PortOperState, PortsOperUpdatePdu, SyncDonePdu,
};
