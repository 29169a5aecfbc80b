// src/core/protocol/opcode.rs

//! The opcode space shared by both channels. Values are part of the wire
//! contract between peers and must never be reused.

use crate::core::errors::MlagError;

/// A 16-bit opcode leading every framed PDU. The 0x01xx block belongs to
/// the port-manager control channel, the 0x02xx block to mac-sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    PortsSync = 0x0101,
    PortsUpdate = 0x0102,
    PortsOperUpdate = 0x0103,
    PortGlobalState = 0x0104,
    PeerPortOperChange = 0x0105,
    PortsSyncDone = 0x0106,
    PortsSyncFinish = 0x0107,
    MasterSyncDone = 0x0108,

    MacLocalLearn = 0x0201,
    MacLocalAge = 0x0202,
    MacGlobalLearn = 0x0203,
    MacGlobalAge = 0x0204,
    FlushPeerStart = 0x0205,
    FlushMasterStart = 0x0206,
    FlushAck = 0x0207,
    AllFdbGet = 0x0208,
    AllFdbExport = 0x0209,
}

impl Opcode {
    pub fn from_u16(raw: u16) -> Result<Self, MlagError> {
        Ok(match raw {
            0x0101 => Opcode::PortsSync,
            0x0102 => Opcode::PortsUpdate,
            0x0103 => Opcode::PortsOperUpdate,
            0x0104 => Opcode::PortGlobalState,
            0x0105 => Opcode::PeerPortOperChange,
            0x0106 => Opcode::PortsSyncDone,
            0x0107 => Opcode::PortsSyncFinish,
            0x0108 => Opcode::MasterSyncDone,
            0x0201 => Opcode::MacLocalLearn,
            0x0202 => Opcode::MacLocalAge,
            0x0203 => Opcode::MacGlobalLearn,
            0x0204 => Opcode::MacGlobalAge,
            0x0205 => Opcode::FlushPeerStart,
            0x0206 => Opcode::FlushMasterStart,
            0x0207 => Opcode::FlushAck,
            0x0208 => Opcode::AllFdbGet,
            0x0209 => Opcode::AllFdbExport,
            other => {
                return Err(MlagError::Protocol(format!("unknown opcode {other:#06x}")));
            }
        })
    }

    /// Name used by the dispatcher when logging a failed handler.
    pub fn name(self) -> &'static str {
        match self {
            Opcode::PortsSync => "PORTS_SYNC",
            Opcode::PortsUpdate => "PORTS_UPDATE",
            Opcode::PortsOperUpdate => "PORTS_OPER_UPDATE",
            Opcode::PortGlobalState => "PORT_GLOBAL_STATE",
            Opcode::PeerPortOperChange => "PEER_PORT_OPER_CHANGE",
            Opcode::PortsSyncDone => "PORTS_SYNC_DONE",
            Opcode::PortsSyncFinish => "PORTS_SYNC_FINISH",
            Opcode::MasterSyncDone => "MASTER_SYNC_DONE",
            Opcode::MacLocalLearn => "MAC_SYNC_LOCAL_LEARN",
            Opcode::MacLocalAge => "MAC_SYNC_LOCAL_AGE",
            Opcode::MacGlobalLearn => "MAC_SYNC_GLOBAL_LEARN",
            Opcode::MacGlobalAge => "MAC_SYNC_GLOBAL_AGE",
            Opcode::FlushPeerStart => "MAC_SYNC_FLUSH_PEER_START",
            Opcode::FlushMasterStart => "MAC_SYNC_FLUSH_MASTER_START",
            Opcode::FlushAck => "MAC_SYNC_FLUSH_ACK",
            Opcode::AllFdbGet => "MAC_SYNC_ALL_FDB_GET",
            Opcode::AllFdbExport => "MAC_SYNC_ALL_FDB_EXPORT",
        }
    }
}
