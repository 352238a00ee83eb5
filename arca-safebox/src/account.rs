//! Account entity and the per-operation state deltas folded into it.

use arca_base::{ArcaEncode, ArcaWrite};
use serde::{Deserialize, Serialize};

use crate::keys::Public;

/// A single ledger account. Identified by a dense contiguous number;
/// created by block mining, mutated only through applied operations,
/// never freed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub number: u32,
    pub public_key: Public,
    pub balance: u64,
    /// Block index of the last mutation.
    pub updated_index: u32,
    /// Count of operations applied with this account as source.
    pub operations: u32,
}

impl Account {
    pub fn new(number: u32, public_key: Public, minted_index: u32) -> Self {
        Self {
            number,
            public_key,
            balance: 0,
            updated_index: minted_index,
            operations: 0,
        }
    }

    /// Fold one delta into the account. Deltas come from validated
    /// operations, so balance arithmetic cannot underflow here; the
    /// saturation is a backstop, not a code path.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        match delta {
            StateDelta::BalanceAdd { amount, block } => {
                self.balance = self.balance.saturating_add(*amount);
                self.updated_index = *block;
            }
            StateDelta::BalanceSub { amount, block } => {
                self.balance = self.balance.saturating_sub(*amount);
                self.updated_index = *block;
                // The debit leg of an operation is what advances the
                // source's operation counter: every operation debits its
                // source exactly once.
                self.operations += 1;
            }
            StateDelta::KeyChange { public, block } => {
                self.public_key = public.clone();
                self.updated_index = *block;
            }
        }
    }

    /// Fixed-layout buffer this account contributes to the block hash.
    pub fn hash_buffer(&self) -> AccountHashBuffer {
        AccountHashBuffer {
            number: self.number,
            public_key: self.public_key.clone(),
            balance: self.balance,
            updated_index: self.updated_index,
            operations: self.operations,
        }
    }
}

/// One atomic mutation of a single account, produced by `Tx::apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDelta {
    BalanceAdd { amount: u64, block: u32 },
    BalanceSub { amount: u64, block: u32 },
    KeyChange { public: Public, block: u32 },
}

/// Per-account input to the block hash (consensus layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountHashBuffer {
    pub number: u32,
    pub public_key: Public,
    pub balance: u64,
    pub updated_index: u32,
    pub operations: u32,
}

impl ArcaEncode for AccountHashBuffer {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(self.number);
        self.public_key.arca_encode(writer);
        writer.write_u64(self.balance);
        writer.write_u32(self.updated_index);
        writer.write_u32(self.operations);
    }
}
