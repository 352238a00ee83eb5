use arca_base::CodecError;

/// Violations of the peer wire protocol. Every variant is fatal to the
/// connection that produced it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("wrong network magic {actual:#010X}, expected {expected:#010X}")]
    BadMagic { expected: u32, actual: u32 },

    #[error("invalid rpc type {0}")]
    InvalidRpcType(u16),

    #[error("invalid operation code {0}")]
    InvalidOpcode(u16),

    #[error("frame payload {len} bytes exceeds limit {max}")]
    OversizeFrame { len: u32, max: u32 },

    #[error("response with unknown request id {0}")]
    UnmatchedResponse(u32),

    #[error("loopback connection (peer nonce equals ours)")]
    Loopback,

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("handshake rejected with result code {0}")]
    HandshakeRejected(u16),

    #[error("undecodable payload from peer: {0}")]
    InvalidPayload(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
