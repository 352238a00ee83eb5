//! The node orchestrator: one event loop owning the safebox, fed by
//! every peer connection, fanning accepted blocks and operations back
//! out to the rest of the network.

pub mod chain;
pub mod event;
pub mod node;
pub mod storage;

pub use chain::{genesis_public, AdmitError, Chain, SharedChain};
pub use event::ChainEvent;
pub use node::{Node, NodeHandle};
pub use storage::{MemoryStorage, Storage};
