//! Typed payloads carried inside frames. All of them encode with the
//! deterministic wire codec; the frame layer never looks inside.

use arca_base::{decode_list, encode_list, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError};
use arca_safebox::{SerializedBlock, SerializedBlockHeader, Tx};

/// A peer address as gossiped inside `hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    pub address: String,
    pub port: u16,
    pub last_seen: u32,
}

impl ArcaEncode for PeerEndpoint {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        self.address.arca_encode(writer);
        writer.write_u16(self.port);
        writer.write_u32(self.last_seen);
    }
}

impl ArcaDecode for PeerEndpoint {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            address: String::arca_decode(reader)?,
            port: reader.read_u16()?,
            last_seen: reader.read_u32()?,
        })
    }
}

/// Handshake payload: who we are and where our chain stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketHello {
    pub server_port: u16,
    pub nonce: Vec<u8>,
    /// Pending-block header (header-only tag), carrying our height and
    /// prev safebox hash.
    pub block: SerializedBlockHeader,
    pub peers: Vec<PeerEndpoint>,
    pub user_agent: String,
    pub timestamp: u32,
}

impl ArcaEncode for PacketHello {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u16(self.server_port);
        writer.write_prefixed(&self.nonce);
        self.block.arca_encode(writer);
        encode_list(writer, &self.peers);
        self.user_agent.arca_encode(writer);
        writer.write_u32(self.timestamp);
    }
}

impl ArcaDecode for PacketHello {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            server_port: reader.read_u16()?,
            nonce: reader.read_prefixed()?,
            block: SerializedBlockHeader::arca_decode(reader)?,
            peers: decode_list(reader)?,
            user_agent: String::arca_decode(reader)?,
            timestamp: reader.read_u32()?,
        })
    }
}

/// Free-form error report; informational, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketError {
    pub message: String,
}

impl ArcaEncode for PacketError {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        self.message.arca_encode(writer);
    }
}

impl ArcaDecode for PacketError {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            message: String::arca_decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketGetBlocksRequest {
    pub from_index: u32,
    pub to_index: u32,
}

impl ArcaEncode for PacketGetBlocksRequest {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(self.from_index);
        writer.write_u32(self.to_index);
    }
}

impl ArcaDecode for PacketGetBlocksRequest {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            from_index: reader.read_u32()?,
            to_index: reader.read_u32()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketGetBlocksResponse {
    pub blocks: Vec<SerializedBlock>,
}

impl ArcaEncode for PacketGetBlocksResponse {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        encode_list(writer, &self.blocks);
    }
}

impl ArcaDecode for PacketGetBlocksResponse {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            blocks: decode_list(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketNewBlock {
    pub block: SerializedBlock,
}

impl ArcaEncode for PacketNewBlock {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        self.block.arca_encode(writer);
    }
}

impl ArcaDecode for PacketNewBlock {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            block: SerializedBlock::arca_decode(reader)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketNewOperations {
    pub operations: Vec<Tx>,
}

impl ArcaEncode for PacketNewOperations {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        encode_list(writer, &self.operations);
    }
}

impl ArcaDecode for PacketNewOperations {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            operations: decode_list(reader)?,
        })
    }
}
