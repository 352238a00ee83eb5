//! Pool of validated operations waiting for a block, plus the bounded
//! seen-cache used to avoid echoing an operation back to peers that
//! already have it.

use std::collections::{HashMap, HashSet, VecDeque};

use arca_base::Hash32;
use arca_safebox::Tx;

/// Errors returned by [`Mempool`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    #[error("operation already pooled")]
    Duplicate,

    #[error("mempool full ({0} operations)")]
    Full(usize),
}

/// FIFO pool keyed by operation hash.
///
/// Ordering is insertion order; draining for block assembly preserves
/// it. Entries leave the pool when mined or explicitly removed.
pub struct Mempool {
    capacity: usize,
    by_hash: HashMap<Hash32, Tx>,
    order: VecDeque<Hash32>,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_hash: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Insert an already-validated operation. Rejects duplicates by hash.
    pub fn insert(&mut self, tx: Tx) -> Result<Hash32, MempoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            return Err(MempoolError::Duplicate);
        }
        if self.by_hash.len() >= self.capacity {
            return Err(MempoolError::Full(self.capacity));
        }

        self.by_hash.insert(hash, tx);
        self.order.push_back(hash);
        Ok(hash)
    }

    pub fn remove(&mut self, hash: &Hash32) -> Option<Tx> {
        self.by_hash.remove(hash)
    }

    /// Drop every operation a freshly applied block included.
    pub fn prune_mined(&mut self, mined: &[Tx]) {
        for tx in mined {
            self.by_hash.remove(&tx.hash());
        }
        self.order.retain(|h| self.by_hash.contains_key(h));
    }

    /// Snapshot in insertion order, for pending-block assembly.
    pub fn ordered(&self) -> Vec<Tx> {
        self.order
            .iter()
            .filter_map(|h| self.by_hash.get(h).cloned())
            .collect()
    }
}

/// Bounded insertion-ordered set of operation hashes one peer is known
/// to hold; oldest entries fall out first.
pub struct SeenCache {
    capacity: usize,
    set: HashSet<Hash32>,
    order: VecDeque<Hash32>,
}

impl SeenCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            set: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    pub fn contains(&self, hash: &Hash32) -> bool {
        self.set.contains(hash)
    }

    /// Record a hash; returns false if it was already present.
    pub fn note(&mut self, hash: Hash32) -> bool {
        if !self.set.insert(hash) {
            return false;
        }
        self.order.push_back(hash);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.set.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}
