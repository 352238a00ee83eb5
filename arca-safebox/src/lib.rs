//! Account state and the operations that mutate it.
//!
//! The safebox is the authoritative in-memory snapshot of every account
//! at the current chain tip. Blocks advance it atomically: every
//! operation is validated, the resulting deltas are folded into an
//! overlay, and the overlay commits only if the whole block holds up.

pub mod account;
pub mod block;
pub mod error;
pub mod keys;
pub mod safebox;
pub mod tx;

pub use account::{Account, AccountHashBuffer, StateDelta};
pub use block::{operations_hash, reward_at, Block, BlockMeta, SerializedBlock, SerializedBlockHeader, Version};
pub use error::{StateError, ValidationError};
pub use keys::{PermissiveVerifier, Public, Signature, SignatureVerifier};
pub use safebox::{Safebox, ACCOUNTS_PER_BLOCK};
pub use tx::{ChangeKey, Transfer, Tx, TxContext};
