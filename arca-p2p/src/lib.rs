//! The peer wire: frame layout and codec, the request/response
//! correlation engine, typed packet payloads, the per-peer state machine
//! and the tokio net driver that moves bytes for all of them.
//!
//! The engine and the peer machine are sans-io: they consume frames and
//! instants, and produce frames and events. IO lives in [`driver`].

pub mod driver;
pub mod engine;
pub mod error;
pub mod frame;
pub mod packets;
pub mod peer;

pub use driver::{DriverConfig, NetDriver, NetEvent, NetMessage, PeerCommand, PeerHandle};
pub use engine::{ProtocolEngine, ResponseHandler};
pub use error::ProtocolError;
pub use frame::{Frame, FrameCodec, OpCode, RpcKind, MAX_PAYLOAD};
pub use packets::{
    PacketError, PacketGetBlocksRequest, PacketGetBlocksResponse, PacketHello, PacketNewBlock,
    PacketNewOperations, PeerEndpoint,
};
pub use peer::{ChainView, PeerConfig, PeerConnection, PeerEvent, PeerOutput, PeerState};
