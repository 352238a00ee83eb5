//! Chain state owned by the orchestrator: the safebox, block storage
//! and the mempool, plus the read-only view peers use to answer hello
//! and `getblocks`.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arca_base::Hash32;
use arca_mempool::{Mempool, MempoolError};
use arca_p2p::ChainView;
use arca_safebox::{
    Block, BlockMeta, Public, Safebox, SerializedBlock, SerializedBlockHeader, SignatureVerifier,
    StateError, Tx, ValidationError,
};
use parking_lot::RwLock;

use crate::storage::Storage;

/// The key owning the genesis account batch. Network constant.
pub fn genesis_public() -> Public {
    Public::new(714, vec![0x02; 32], vec![0x03; 32])
}

/// Mining target carried in pending headers until retargeting exists
/// outside the core.
const PENDING_TARGET: u32 = 0x1D00_FFFF;

#[derive(Debug, thiserror::Error)]
pub enum AdmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),
}

pub struct Chain {
    verifier: Arc<dyn SignatureVerifier>,
    storage: Box<dyn Storage>,
    safebox: Safebox,
    mempool: Mempool,
    miner_key: Public,
}

impl Chain {
    /// Restore from storage, or start at genesis.
    pub fn new(
        verifier: Arc<dyn SignatureVerifier>,
        storage: Box<dyn Storage>,
        genesis_key: Public,
        mempool_capacity: usize,
    ) -> Self {
        let safebox = storage
            .load_safebox()
            .unwrap_or_else(|| Safebox::genesis(genesis_key.clone()));

        Self {
            verifier,
            storage,
            safebox,
            mempool: Mempool::new(mempool_capacity),
            miner_key: genesis_key,
        }
    }

    pub fn height(&self) -> u32 {
        self.safebox.height()
    }

    pub fn safebox_hash(&self) -> Hash32 {
        self.safebox.safebox_hash()
    }

    pub fn safebox(&self) -> &Safebox {
        &self.safebox
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// The block this node would mine next: current mempool over the
    /// current tip.
    pub fn pending_block(&self) -> Block {
        Block::new(BlockMeta {
            index: self.safebox.height() + 1,
            miner: self.miner_key.clone(),
            timestamp: unix_now(),
            target: PENDING_TARGET,
            nonce: 0,
            payload: Vec::new(),
            prev_safebox_hash: self.safebox.safebox_hash(),
            operations: self.mempool.ordered(),
        })
    }

    /// Validate and apply one network block, persist, and drop its
    /// operations from the mempool. Atomic: a failed block leaves every
    /// piece of state untouched.
    pub fn try_apply(&mut self, serialized: &SerializedBlock) -> Result<u32, StateError> {
        let block = Block::from_serialized(serialized)?;
        self.safebox.apply_block(self.verifier.as_ref(), &block)?;

        self.storage.store_block(serialized);
        self.storage.persist_safebox(&self.safebox);
        self.mempool.prune_mined(block.operations());
        Ok(block.index())
    }

    /// Validate an operation against the tip and pool it.
    pub fn admit_tx(&mut self, tx: Tx) -> Result<Hash32, AdmitError> {
        self.safebox.validate_tx(self.verifier.as_ref(), &tx)?;
        Ok(self.mempool.insert(tx)?)
    }

    pub fn serialized_block(&self, index: u32) -> Option<SerializedBlock> {
        self.storage.load_block(index)
    }
}

/// Shared read view handed to peer connections. Lock scope is one
/// accessor call; peers never hold it across IO.
#[derive(Clone)]
pub struct SharedChain(pub Arc<RwLock<Chain>>);

impl ChainView for SharedChain {
    fn pending_header(&self) -> SerializedBlockHeader {
        self.0.read().pending_block().serialize_header(false)
    }

    fn serialized_block(&self, index: u32) -> Option<SerializedBlock> {
        self.0.read().serialized_block(index)
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
