//! The safebox: every account at the current tip, advanced one block at
//! a time.

use std::collections::HashMap;

use arca_base::{empty_hash, sha256_pair, Hash32};

use crate::account::Account;
use crate::block::{reward_at, Block};
use crate::error::{StateError, ValidationError};
use crate::keys::{Public, SignatureVerifier};
use crate::tx::{Tx, TxContext};

/// Accounts minted by each block. Consensus parameter.
pub const ACCOUNTS_PER_BLOCK: u32 = 5;

/// In-memory account snapshot plus the chained safebox commitment.
///
/// Owned exclusively by the orchestrator; peers only ever see value
/// copies of `(height, hash)`.
#[derive(Debug, Clone)]
pub struct Safebox {
    accounts: Vec<Account>,
    height: u32,
    safebox_hash: Hash32,
}

impl Safebox {
    /// The post-genesis safebox: block 0's account batch under the
    /// genesis key, with the initial reward credited to account 0.
    pub fn genesis(miner: Public) -> Self {
        let mut accounts: Vec<Account> = (0..ACCOUNTS_PER_BLOCK)
            .map(|number| Account::new(number, miner.clone(), 0))
            .collect();
        accounts[0].balance = reward_at(0);

        Self {
            accounts,
            height: 0,
            safebox_hash: empty_hash(),
        }
    }

    /// Index of the last applied block.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Commitment to the state at the current tip; blocks bind to it via
    /// their `prev_safebox_hash` header field.
    pub fn safebox_hash(&self) -> Hash32 {
        self.safebox_hash
    }

    pub fn account(&self, number: u32) -> Option<&Account> {
        self.accounts.get(number as usize)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of all balances. Changes by exactly the block reward per
    /// applied block.
    pub fn total_supply(&self) -> u64 {
        self.accounts.iter().map(|a| a.balance).sum()
    }

    /// Validate one operation against the current tip (mempool ingress).
    pub fn validate_tx(
        &self,
        verifier: &dyn SignatureVerifier,
        tx: &Tx,
    ) -> Result<TxContext, ValidationError> {
        tx.validate(verifier, |number| self.account(number))
    }

    /// Apply one block atomically.
    ///
    /// Operations validate and fold into an overlay in order, so later
    /// operations see earlier ones' effects; nothing touches the safebox
    /// until every operation has passed. On any rejection the state is
    /// byte-identical to before the call.
    pub fn apply_block(
        &mut self,
        verifier: &dyn SignatureVerifier,
        block: &Block,
    ) -> Result<(), StateError> {
        let index = block.index();
        if index <= self.height {
            return Err(StateError::DuplicateBlock(index));
        }
        if index != self.height + 1 {
            return Err(StateError::OutOfOrderBlock {
                expected: self.height + 1,
                actual: index,
            });
        }
        if block.prev_safebox_hash() != self.safebox_hash {
            return Err(StateError::SafeboxHashMismatch(index));
        }

        let mut overlay: HashMap<u32, Account> = HashMap::new();
        for tx in block.operations() {
            let ctx = tx.validate(verifier, |number| {
                overlay
                    .get(&number)
                    .or_else(|| self.account(number))
            })?;

            for (number, deltas) in tx.apply(index, &ctx) {
                let account = match overlay.entry(number) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        // Validation proved the account exists.
                        let Some(base) = self.account(number) else {
                            return Err(StateError::Validation(
                                ValidationError::UnknownAccount(number),
                            ));
                        };
                        e.insert(base.clone())
                    }
                };
                for delta in &deltas {
                    account.apply_delta(delta);
                }
            }
        }

        // Commit: fold the overlay back, append the minted batch and
        // credit reward plus collected fees to its first account.
        for (number, account) in overlay {
            self.accounts[number as usize] = account;
        }

        let mut minted = block.minted().to_vec();
        if let Some(first) = minted.first_mut() {
            first.balance = block.reward().saturating_add(block.fee());
        }
        debug_assert_eq!(minted[0].number as usize, self.accounts.len());
        self.accounts.extend(minted);

        self.height = index;
        self.safebox_hash = sha256_pair(&self.safebox_hash, &block.hash());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockMeta;
    use crate::keys::{PermissiveVerifier, Signature};
    use crate::tx::Transfer;

    fn genesis_key() -> Public {
        Public::new(714, vec![1; 4], vec![2; 4])
    }

    fn signature() -> Signature {
        Signature {
            r: vec![1],
            s: vec![2],
        }
    }

    fn transfer(source: u32, op_id: u32, dest: u32, amount: u64, fee: u64) -> Tx {
        Tx::Transfer(Transfer {
            source,
            op_id,
            dest,
            amount,
            fee,
            payload: vec![],
            source_public: genesis_key(),
            signature: signature(),
        })
    }

    fn next_block(safebox: &Safebox, operations: Vec<Tx>) -> Block {
        Block::new(BlockMeta {
            index: safebox.height() + 1,
            miner: genesis_key(),
            timestamp: 1_530_000_000 + safebox.height(),
            target: 0x1D00_FFFF,
            nonce: 0,
            payload: vec![],
            prev_safebox_hash: safebox.safebox_hash(),
            operations,
        })
    }

    #[test]
    fn genesis_shape() {
        let safebox = Safebox::genesis(genesis_key());
        assert_eq!(safebox.height(), 0);
        assert_eq!(safebox.account_count(), 5);
        assert_eq!(safebox.account(0).unwrap().balance, reward_at(0));
        assert_eq!(safebox.total_supply(), reward_at(0));
    }

    #[test]
    fn apply_transfer_block() {
        let mut safebox = Safebox::genesis(genesis_key());
        let block = next_block(&safebox, vec![transfer(0, 1, 1, 100, 1)]);
        safebox.apply_block(&PermissiveVerifier, &block).unwrap();

        assert_eq!(safebox.height(), 1);
        assert_eq!(safebox.account(1).unwrap().balance, 100);
        assert_eq!(
            safebox.account(0).unwrap().balance,
            reward_at(0) - 101
        );
        assert_eq!(safebox.account(0).unwrap().operations, 1);
        // Block 1 minted accounts 5..10; the first one claimed reward + fee.
        assert_eq!(safebox.account_count(), 10);
        assert_eq!(safebox.account(5).unwrap().balance, reward_at(1) + 1);
    }

    #[test]
    fn supply_grows_by_exactly_the_reward() {
        let mut safebox = Safebox::genesis(genesis_key());
        let before = safebox.total_supply();
        let block = next_block(&safebox, vec![transfer(0, 1, 1, 100, 7)]);
        safebox.apply_block(&PermissiveVerifier, &block).unwrap();
        assert_eq!(safebox.total_supply(), before + reward_at(1));
    }

    #[test]
    fn intra_block_chaining_sees_prior_operations() {
        let mut safebox = Safebox::genesis(genesis_key());
        // Account 0 sends twice in the same block: op ids 1 then 2.
        let block = next_block(
            &safebox,
            vec![transfer(0, 1, 1, 10, 0), transfer(0, 2, 2, 10, 0)],
        );
        safebox.apply_block(&PermissiveVerifier, &block).unwrap();
        assert_eq!(safebox.account(0).unwrap().operations, 2);
        assert_eq!(safebox.account(1).unwrap().balance, 10);
        assert_eq!(safebox.account(2).unwrap().balance, 10);
    }

    #[test]
    fn failed_operation_rolls_back_whole_block() {
        let mut safebox = Safebox::genesis(genesis_key());
        let pristine = safebox.clone();

        // Second operation reuses op id 1: stale, the whole block dies.
        let block = next_block(
            &safebox,
            vec![transfer(0, 1, 1, 10, 0), transfer(0, 1, 2, 10, 0)],
        );
        let err = safebox
            .apply_block(&PermissiveVerifier, &block)
            .unwrap_err();
        assert!(matches!(
            err,
            StateError::Validation(ValidationError::StaleOpId { .. })
        ));

        assert_eq!(safebox.height(), pristine.height());
        assert_eq!(safebox.account_count(), pristine.account_count());
        assert_eq!(
            safebox.account(0).unwrap(),
            pristine.account(0).unwrap()
        );
        assert_eq!(safebox.safebox_hash(), pristine.safebox_hash());
    }

    #[test]
    fn out_of_order_and_duplicate_blocks_rejected() {
        let mut safebox = Safebox::genesis(genesis_key());
        let block1 = next_block(&safebox, vec![]);

        let mut gapped = block1.clone();
        safebox.apply_block(&PermissiveVerifier, &block1).unwrap();

        // Same index again: duplicate.
        let err = safebox.apply_block(&PermissiveVerifier, &gapped).unwrap_err();
        assert_eq!(err, StateError::DuplicateBlock(1));

        // Skipping ahead: out of order.
        gapped = Block::new(BlockMeta {
            index: 3,
            miner: genesis_key(),
            timestamp: 0,
            target: 0,
            nonce: 0,
            payload: vec![],
            prev_safebox_hash: safebox.safebox_hash(),
            operations: vec![],
        });
        let err = safebox.apply_block(&PermissiveVerifier, &gapped).unwrap_err();
        assert_eq!(
            err,
            StateError::OutOfOrderBlock {
                expected: 2,
                actual: 3
            }
        );
    }

    #[test]
    fn stale_prev_hash_rejected() {
        let mut safebox = Safebox::genesis(genesis_key());
        let mut meta = BlockMeta {
            index: 1,
            miner: genesis_key(),
            timestamp: 0,
            target: 0,
            nonce: 0,
            payload: vec![],
            prev_safebox_hash: [0xAB; 32],
            operations: vec![],
        };
        meta.prev_safebox_hash[0] = 0xCD;
        let block = Block::new(meta);
        let err = safebox.apply_block(&PermissiveVerifier, &block).unwrap_err();
        assert_eq!(err, StateError::SafeboxHashMismatch(1));
    }

    #[test]
    fn safebox_hash_advances_per_block() {
        let mut safebox = Safebox::genesis(genesis_key());
        let h0 = safebox.safebox_hash();
        let block = next_block(&safebox, vec![]);
        safebox.apply_block(&PermissiveVerifier, &block).unwrap();
        assert_ne!(safebox.safebox_hash(), h0);
        assert_eq!(
            safebox.safebox_hash(),
            sha256_pair(&h0, &block.hash())
        );
    }
}
