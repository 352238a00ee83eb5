//! Frame layout and the tokio-util codec that cuts byte streams into
//! frames.
//!
//! Header, little-endian, 24 bytes:
//!
//! ```text
//! magic u32 · rpc_type u16 · operation u16 · request_id u32 ·
//! protocol_ver u16 · protocol_avail u16 · payload_len u32 ·
//! result u16 · reserved [u8; 2]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Fixed header size on the wire.
pub const HEADER_LEN: usize = 24;

/// Upper bound on a frame payload. Anything larger is a protocol
/// violation, not a large message.
pub const MAX_PAYLOAD: u32 = 10 * 1024 * 1024;

/// Protocol version advertised in every frame.
pub const PROTOCOL_VERSION: u16 = 6;
/// Highest protocol version this build can speak.
pub const PROTOCOL_AVAILABLE: u16 = 6;

/// Response result codes.
pub mod result_code {
    pub const SUCCESS: u16 = 0;
    pub const INVALID_DATA_BUFFER_INFO: u16 = 2;
    pub const INTERNAL: u16 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RpcKind {
    Request = 1,
    Response = 2,
    Notification = 3,
}

impl RpcKind {
    pub fn from_wire(value: u16) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(RpcKind::Request),
            2 => Ok(RpcKind::Response),
            3 => Ok(RpcKind::Notification),
            other => Err(ProtocolError::InvalidRpcType(other)),
        }
    }
}

/// Protocol operation codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpCode {
    Hello = 1,
    Error = 2,
    Message = 3,
    GetBlocks = 4,
    GetHeaders = 5,
    NewBlock = 6,
    NewOperations = 7,
}

impl OpCode {
    pub fn from_wire(value: u16) -> Option<Self> {
        match value {
            1 => Some(OpCode::Hello),
            2 => Some(OpCode::Error),
            3 => Some(OpCode::Message),
            4 => Some(OpCode::GetBlocks),
            5 => Some(OpCode::GetHeaders),
            6 => Some(OpCode::NewBlock),
            7 => Some(OpCode::NewOperations),
            _ => None,
        }
    }
}

/// One complete frame, magic already checked and stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: RpcKind,
    pub operation: u16,
    pub request_id: u32,
    /// Meaningful on responses only; zero elsewhere.
    pub result: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn request(operation: OpCode, request_id: u32, payload: Bytes) -> Self {
        Self {
            kind: RpcKind::Request,
            operation: operation as u16,
            request_id,
            result: result_code::SUCCESS,
            payload,
        }
    }

    pub fn response(operation: u16, request_id: u32, result: u16, payload: Bytes) -> Self {
        Self {
            kind: RpcKind::Response,
            operation,
            request_id,
            result,
            payload,
        }
    }

    pub fn notification(operation: OpCode, payload: Bytes) -> Self {
        Self {
            kind: RpcKind::Notification,
            operation: operation as u16,
            request_id: 0,
            result: result_code::SUCCESS,
            payload,
        }
    }

    pub fn opcode(&self) -> Option<OpCode> {
        OpCode::from_wire(self.operation)
    }
}

/// Stream codec for [`Frame`], bound to one network's magic.
///
/// Partial frames stay buffered; decode yields only complete frames.
/// Wrong magic and oversize payloads are fatal decode errors.
pub struct FrameCodec {
    magic: u32,
    pending_payload: Option<PartialHeader>,
}

struct PartialHeader {
    kind: RpcKind,
    operation: u16,
    request_id: u32,
    result: u16,
    payload_len: usize,
}

impl FrameCodec {
    pub fn new(magic: u32) -> Self {
        Self {
            magic,
            pending_payload: None,
        }
    }

    fn read_header(&self, src: &mut BytesMut) -> Result<Option<PartialHeader>, ProtocolError> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let magic = src.get_u32_le();
        if magic != self.magic {
            return Err(ProtocolError::BadMagic {
                expected: self.magic,
                actual: magic,
            });
        }

        let kind = RpcKind::from_wire(src.get_u16_le())?;
        let operation = src.get_u16_le();
        let request_id = src.get_u32_le();
        let _protocol_ver = src.get_u16_le();
        let _protocol_avail = src.get_u16_le();
        let payload_len = src.get_u32_le();
        let result = src.get_u16_le();
        src.advance(2); // reserved

        if payload_len > MAX_PAYLOAD {
            return Err(ProtocolError::OversizeFrame {
                len: payload_len,
                max: MAX_PAYLOAD,
            });
        }

        Ok(Some(PartialHeader {
            kind,
            operation,
            request_id,
            result,
            payload_len: payload_len as usize,
        }))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        let header = match self.pending_payload.take() {
            Some(header) => header,
            None => match self.read_header(src)? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        if src.len() < header.payload_len {
            // Reserve so the next fill can complete the payload in one read.
            src.reserve(header.payload_len - src.len());
            self.pending_payload = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(header.payload_len).freeze();
        Ok(Some(Frame {
            kind: header.kind,
            operation: header.operation,
            request_id: header.request_id,
            result: header.result,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let len = frame.payload.len() as u32;
        if len > MAX_PAYLOAD {
            return Err(ProtocolError::OversizeFrame {
                len,
                max: MAX_PAYLOAD,
            });
        }

        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u32_le(self.magic);
        dst.put_u16_le(frame.kind as u16);
        dst.put_u16_le(frame.operation);
        dst.put_u32_le(frame.request_id);
        dst.put_u16_le(PROTOCOL_VERSION);
        dst.put_u16_le(PROTOCOL_AVAILABLE);
        dst.put_u32_le(len);
        dst.put_u16_le(frame.result);
        dst.put_slice(&[0u8; 2]);
        dst.put_slice(&frame.payload);
        Ok(())
    }
}
