//! Persistence seam. The core only ever talks to this trait; the
//! in-memory implementation backs tests and ephemeral nodes.

use std::collections::HashMap;

use arca_safebox::{Safebox, SerializedBlock};

pub trait Storage: Send + Sync {
    fn load_block(&self, index: u32) -> Option<SerializedBlock>;
    fn store_block(&mut self, block: &SerializedBlock);
    fn load_safebox(&self) -> Option<Safebox>;
    fn persist_safebox(&mut self, safebox: &Safebox);
}

#[derive(Default)]
pub struct MemoryStorage {
    blocks: HashMap<u32, SerializedBlock>,
    safebox: Option<Safebox>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn load_block(&self, index: u32) -> Option<SerializedBlock> {
        self.blocks.get(&index).cloned()
    }

    fn store_block(&mut self, block: &SerializedBlock) {
        self.blocks.insert(block.header.index, block.clone());
    }

    fn load_safebox(&self) -> Option<Safebox> {
        self.safebox.clone()
    }

    fn persist_safebox(&mut self, safebox: &Safebox) {
        self.safebox = Some(safebox.clone());
    }
}
