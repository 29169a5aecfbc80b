// src/core/protocol/codec.rs

//! The framing codec shared by both TCP channels.
//!
//! A frame is `[u16 opcode][body…]` with no explicit length field; the body
//! length is derived per opcode from the leading count fields, exactly as
//! the peer wrote them. The codec swaps the opcode itself and hands body
//! conversion to the routine registered for the opcode in `wire`.

use crate::core::errors::MlagError;
use crate::core::protocol::opcode::Opcode;
use crate::core::protocol::wire::Pdu;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// A `tokio_util::codec` implementation for framed PDU exchange.
#[derive(Debug)]
pub struct PduCodec {
    /// Upper bound for a single frame, protecting against malformed count
    /// fields. Jumbo frames (the full-FDB export) need a channel configured
    /// with a jumbo bound.
    max_frame: usize,
}

impl PduCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Encoder<Pdu> for PduCodec {
    type Error = MlagError;

    fn encode(&mut self, item: Pdu, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        dst.extend_from_slice(&(item.opcode() as u16).to_be_bytes());
        item.encode_body(dst);
        let frame_len = dst.len() - start;
        if frame_len > self.max_frame {
            dst.truncate(start);
            return Err(MlagError::Protocol(format!(
                "{} frame of {frame_len} bytes exceeds the {}-byte channel limit",
                item.opcode().name(),
                self.max_frame
            )));
        }
        Ok(())
    }
}

impl Decoder for PduCodec {
    type Item = Pdu;
    type Error = MlagError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Pdu>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }
        let raw_opcode = u16::from_be_bytes([src[0], src[1]]);
        let opcode = Opcode::from_u16(raw_opcode)?;

        let Some(body_len) = Pdu::body_len(opcode, &src[2..]) else {
            // The count fields have not arrived yet.
            return Ok(None);
        };
        if 2 + body_len > self.max_frame {
            return Err(MlagError::Protocol(format!(
                "{} frame of {} bytes exceeds the {}-byte channel limit",
                opcode.name(),
                2 + body_len,
                self.max_frame
            )));
        }
        if src.len() < 2 + body_len {
            // Reserve in one step instead of growing incrementally.
            src.reserve(2 + body_len - src.len());
            return Ok(None);
        }

        src.advance(2);
        let body = src.split_to(body_len).freeze();
        Pdu::decode_body(opcode, body).map(Some)
    }
}
