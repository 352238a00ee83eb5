//! Structured events the orchestrator publishes for telemetry and any
//! UI shell sitting on top of the node.

use std::net::SocketAddr;

/// Chain-level outcomes, broadcast to every subscriber.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockAccepted {
        index: u32,
        /// Peer the block arrived from; `None` for locally injected blocks.
        peer: Option<SocketAddr>,
    },
    BlockRejected {
        index: u32,
        reason: String,
    },
    PeerDropped {
        peer: SocketAddr,
        reason: Option<String>,
    },
}
