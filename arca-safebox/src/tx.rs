//! Typed operations: the tagged variant, validation and application.
//!
//! Every variant supports the same capability set: fee accounting, pure
//! validation producing a typed context, infallible application yielding
//! per-account deltas, the canonical to-be-signed serialization and the
//! wire codec. The wire form is a `u32` tag followed by the variant's
//! fields; the tag is not part of the to-be-signed bytes nor of the
//! chained operations hash.

mod change_key;
mod transfer;

pub use change_key::{ChangeKey, ChangeKeyContext};
pub use transfer::{Transfer, TransferContext};

use std::collections::HashMap;

use arca_base::{sha256, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError, Hash32};

use crate::account::{Account, StateDelta};
use crate::error::ValidationError;
use crate::keys::{Public, Signature, SignatureVerifier};

const TAG_TRANSFER: u32 = 1;
const TAG_CHANGE_KEY: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tx {
    Transfer(Transfer),
    ChangeKey(ChangeKey),
}

/// Values resolved during validation, carried into `apply` so that the
/// application step cannot fail. One concrete context per variant.
#[derive(Debug, Clone)]
pub enum TxContext {
    Transfer(TransferContext),
    ChangeKey(ChangeKeyContext),
}

impl Tx {
    pub fn kind(&self) -> &'static str {
        match self {
            Tx::Transfer(_) => "transfer",
            Tx::ChangeKey(_) => "changekey",
        }
    }

    pub fn fee(&self) -> u64 {
        match self {
            Tx::Transfer(tx) => tx.fee,
            Tx::ChangeKey(tx) => tx.fee,
        }
    }

    /// `(source account, operation id, declared source key)`.
    pub fn source_info(&self) -> (u32, u32, &Public) {
        match self {
            Tx::Transfer(tx) => (tx.source, tx.op_id, &tx.source_public),
            Tx::ChangeKey(tx) => (tx.source, tx.op_id, &tx.source_public),
        }
    }

    pub fn signature(&self) -> &Signature {
        match self {
            Tx::Transfer(tx) => &tx.signature,
            Tx::ChangeKey(tx) => &tx.signature,
        }
    }

    /// Canonical signed form. Consensus layout, bit-exact.
    pub fn to_be_signed(&self) -> Vec<u8> {
        match self {
            Tx::Transfer(tx) => tx.to_be_signed(),
            Tx::ChangeKey(tx) => tx.to_be_signed(),
        }
    }

    /// Pure checks against the current account state; returns the typed
    /// context consumed by `apply`.
    pub fn validate<'a, F>(
        &self,
        verifier: &dyn SignatureVerifier,
        lookup: F,
    ) -> Result<TxContext, ValidationError>
    where
        F: Fn(u32) -> Option<&'a Account>,
    {
        match self {
            Tx::Transfer(tx) => tx.validate(verifier, lookup).map(TxContext::Transfer),
            Tx::ChangeKey(tx) => tx.validate(verifier, lookup).map(TxContext::ChangeKey),
        }
    }

    /// Deltas per affected account number. The context always comes from
    /// this operation's own `validate`; a foreign variant yields nothing.
    pub fn apply(&self, block_index: u32, ctx: &TxContext) -> HashMap<u32, Vec<StateDelta>> {
        match (self, ctx) {
            (Tx::Transfer(tx), TxContext::Transfer(ctx)) => tx.apply(block_index, ctx),
            (Tx::ChangeKey(tx), TxContext::ChangeKey(ctx)) => tx.apply(block_index, ctx),
            _ => {
                debug_assert!(false, "context variant does not match operation");
                HashMap::new()
            }
        }
    }

    /// Field encoding without the variant tag; the input to the chained
    /// operations hash and to the per-operation identity hash.
    pub fn encode_underlying<W: ArcaWrite>(&self, writer: &mut W) {
        match self {
            Tx::Transfer(tx) => tx.encode_fields(writer),
            Tx::ChangeKey(tx) => tx.encode_fields(writer),
        }
    }

    /// Identity of this operation for dedup and relay tracking.
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::new();
        self.encode_underlying(&mut buf);
        sha256(&buf)
    }
}

impl ArcaEncode for Tx {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        match self {
            Tx::Transfer(tx) => {
                writer.write_u32(TAG_TRANSFER);
                tx.encode_fields(writer);
            }
            Tx::ChangeKey(tx) => {
                writer.write_u32(TAG_CHANGE_KEY);
                tx.encode_fields(writer);
            }
        }
    }
}

impl ArcaDecode for Tx {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        match reader.read_u32()? {
            TAG_TRANSFER => Ok(Tx::Transfer(Transfer::decode_fields(reader)?)),
            TAG_CHANGE_KEY => Ok(Tx::ChangeKey(ChangeKey::decode_fields(reader)?)),
            tag => Err(CodecError::InvalidVariant {
                what: "operation",
                tag,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::PermissiveVerifier;

    pub(crate) fn key(seed: u8) -> Public {
        Public::new(714, vec![seed; 4], vec![seed.wrapping_add(1); 4])
    }

    pub(crate) fn signature() -> Signature {
        Signature {
            r: vec![0x11; 4],
            s: vec![0x22; 4],
        }
    }

    pub(crate) fn account(number: u32, balance: u64, operations: u32, public: Public) -> Account {
        Account {
            number,
            public_key: public,
            balance,
            updated_index: 0,
            operations,
        }
    }

    fn transfer() -> Tx {
        Tx::Transfer(Transfer {
            source: 0,
            op_id: 1,
            dest: 1,
            amount: 100,
            fee: 1,
            payload: vec![],
            source_public: key(7),
            signature: signature(),
        })
    }

    #[test]
    fn wire_roundtrip_keeps_tag() {
        let tx = transfer();
        let wire = tx.to_wire();
        assert_eq!(&wire[..4], &[1, 0, 0, 0]);
        assert_eq!(Tx::from_wire(&wire).unwrap(), tx);
    }

    #[test]
    fn unknown_tag_is_invalid_variant() {
        let wire = 99u32.to_wire();
        assert_eq!(
            Tx::from_wire(&wire),
            Err(CodecError::InvalidVariant {
                what: "operation",
                tag: 99
            })
        );
    }

    #[test]
    fn underlying_encoding_omits_tag() {
        let tx = transfer();
        let mut fields = Vec::new();
        tx.encode_underlying(&mut fields);
        assert_eq!(&tx.to_wire()[4..], fields.as_slice());
    }

    #[test]
    fn hash_distinguishes_operations() {
        let a = transfer();
        let mut b = a.clone();
        if let Tx::Transfer(ref mut t) = b {
            t.amount = 101;
        }
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn validate_then_apply_round() {
        let source_key = key(7);
        let source = account(0, 1_000, 0, source_key.clone());
        let dest = account(1, 0, 0, key(9));
        let tx = transfer();

        let accounts = [source, dest];
        let ctx = tx
            .validate(&PermissiveVerifier, |n| {
                accounts.iter().find(|a| a.number == n)
            })
            .unwrap();

        let deltas = tx.apply(5, &ctx);
        assert_eq!(deltas.len(), 2);
        assert_eq!(
            deltas[&0],
            vec![StateDelta::BalanceSub {
                amount: 101,
                block: 5
            }]
        );
        assert_eq!(
            deltas[&1],
            vec![StateDelta::BalanceAdd {
                amount: 100,
                block: 5
            }]
        );
    }
}
