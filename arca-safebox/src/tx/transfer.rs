use std::collections::HashMap;

use arca_base::{ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError};

use crate::account::{Account, StateDelta};
use crate::error::ValidationError;
use crate::keys::{Public, Signature, SignatureVerifier};

/// Moves `amount` from `source` to `dest`; the source additionally pays
/// `fee` to the block miner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub source: u32,
    pub op_id: u32,
    pub dest: u32,
    pub amount: u64,
    pub fee: u64,
    pub payload: Vec<u8>,
    pub source_public: Public,
    pub signature: Signature,
}

#[derive(Debug, Clone)]
pub struct TransferContext {
    pub source: Account,
    pub dest: Account,
}

impl Transfer {
    pub fn validate<'a, F>(
        &self,
        verifier: &dyn SignatureVerifier,
        lookup: F,
    ) -> Result<TransferContext, ValidationError>
    where
        F: Fn(u32) -> Option<&'a Account>,
    {
        if self.dest == self.source {
            return Err(ValidationError::SelfTransfer(self.source));
        }

        let source =
            lookup(self.source).ok_or(ValidationError::UnknownAccount(self.source))?;
        let dest = lookup(self.dest).ok_or(ValidationError::UnknownAccount(self.dest))?;

        let expected = source.operations + 1;
        if self.op_id != expected {
            return Err(ValidationError::StaleOpId {
                account: self.source,
                expected,
                actual: self.op_id,
            });
        }

        let needed = self
            .amount
            .checked_add(self.fee)
            .ok_or(ValidationError::InsufficientBalance {
                account: self.source,
                balance: source.balance,
                needed: u64::MAX,
            })?;
        if source.balance < needed {
            return Err(ValidationError::InsufficientBalance {
                account: self.source,
                balance: source.balance,
                needed,
            });
        }

        if self.source_public.key_hash() != source.public_key.key_hash() {
            return Err(ValidationError::KeyMismatch(self.source));
        }

        if !verifier.verify(&self.source_public, &self.to_be_signed(), &self.signature) {
            return Err(ValidationError::BadSignature(self.source));
        }

        Ok(TransferContext {
            source: source.clone(),
            dest: dest.clone(),
        })
    }

    pub fn apply(&self, block_index: u32, ctx: &TransferContext) -> HashMap<u32, Vec<StateDelta>> {
        let mut deltas: HashMap<u32, Vec<StateDelta>> = HashMap::new();
        deltas
            .entry(ctx.source.number)
            .or_default()
            .push(StateDelta::BalanceSub {
                amount: self.amount.saturating_add(self.fee),
                block: block_index,
            });
        deltas
            .entry(ctx.dest.number)
            .or_default()
            .push(StateDelta::BalanceAdd {
                amount: self.amount,
                block: block_index,
            });
        deltas
    }

    /// Consensus layout: `source · op_id · dest · amount · fee · payload
    /// (raw, no prefix) · source key (plain)`.
    pub fn to_be_signed(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32(self.source);
        buf.write_u32(self.op_id);
        buf.write_u32(self.dest);
        buf.write_u64(self.amount);
        buf.write_u64(self.fee);
        buf.write_raw(&self.payload);
        self.source_public.arca_encode(&mut buf);
        buf
    }

    pub(crate) fn encode_fields<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(self.source);
        writer.write_u32(self.op_id);
        writer.write_u32(self.dest);
        writer.write_u64(self.amount);
        writer.write_u64(self.fee);
        writer.write_prefixed(&self.payload);
        self.source_public.arca_encode(writer);
        self.signature.arca_encode(writer);
    }

    pub(crate) fn decode_fields<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            source: reader.read_u32()?,
            op_id: reader.read_u32()?,
            dest: reader.read_u32()?,
            amount: reader.read_u64()?,
            fee: reader.read_u64()?,
            payload: reader.read_prefixed()?,
            source_public: Public::arca_decode(reader)?,
            signature: Signature::arca_decode(reader)?,
        })
    }
}
