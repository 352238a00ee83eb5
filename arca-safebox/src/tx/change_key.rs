use std::collections::HashMap;

use arca_base::{ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError};

use crate::account::{Account, StateDelta};
use crate::error::ValidationError;
use crate::keys::{Public, Signature, SignatureVerifier};

/// Re-keys the source account to `new_public`; the source pays `fee`.
/// `new_public` travels as an opaque encoded key and is parsed during
/// validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeKey {
    pub source: u32,
    pub op_id: u32,
    pub fee: u64,
    pub payload: Vec<u8>,
    pub source_public: Public,
    pub new_public: Vec<u8>,
    pub signature: Signature,
}

#[derive(Debug, Clone)]
pub struct ChangeKeyContext {
    pub source: Account,
    pub new_public: Public,
}

impl ChangeKey {
    pub fn validate<'a, F>(
        &self,
        verifier: &dyn SignatureVerifier,
        lookup: F,
    ) -> Result<ChangeKeyContext, ValidationError>
    where
        F: Fn(u32) -> Option<&'a Account>,
    {
        let source =
            lookup(self.source).ok_or(ValidationError::UnknownAccount(self.source))?;

        let expected = source.operations + 1;
        if self.op_id != expected {
            return Err(ValidationError::StaleOpId {
                account: self.source,
                expected,
                actual: self.op_id,
            });
        }

        if source.balance < self.fee {
            return Err(ValidationError::InsufficientBalance {
                account: self.source,
                balance: source.balance,
                needed: self.fee,
            });
        }

        let new_public =
            Public::from_plain(&self.new_public).map_err(|_| ValidationError::MalformedKey)?;

        if self.source_public.key_hash() != source.public_key.key_hash() {
            return Err(ValidationError::KeyMismatch(self.source));
        }

        if !verifier.verify(&self.source_public, &self.to_be_signed(), &self.signature) {
            return Err(ValidationError::BadSignature(self.source));
        }

        Ok(ChangeKeyContext {
            source: source.clone(),
            new_public,
        })
    }

    pub fn apply(&self, block_index: u32, ctx: &ChangeKeyContext) -> HashMap<u32, Vec<StateDelta>> {
        let mut deltas = HashMap::new();
        deltas.insert(
            ctx.source.number,
            vec![
                StateDelta::KeyChange {
                    public: ctx.new_public.clone(),
                    block: block_index,
                },
                StateDelta::BalanceSub {
                    amount: self.fee,
                    block: block_index,
                },
            ],
        );
        deltas
    }

    /// Consensus layout: `source · op_id · fee · payload (raw, no prefix)
    /// · source key (plain) · new key (prefixed)`.
    pub fn to_be_signed(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_u32(self.source);
        buf.write_u32(self.op_id);
        buf.write_u64(self.fee);
        buf.write_raw(&self.payload);
        self.source_public.arca_encode(&mut buf);
        buf.write_prefixed(&self.new_public);
        buf
    }

    pub(crate) fn encode_fields<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(self.source);
        writer.write_u32(self.op_id);
        writer.write_u64(self.fee);
        writer.write_prefixed(&self.payload);
        self.source_public.arca_encode(writer);
        writer.write_prefixed(&self.new_public);
        self.signature.arca_encode(writer);
    }

    pub(crate) fn decode_fields<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            source: reader.read_u32()?,
            op_id: reader.read_u32()?,
            fee: reader.read_u64()?,
            payload: reader.read_prefixed()?,
            source_public: Public::arca_decode(reader)?,
            new_public: reader.read_prefixed()?,
            signature: Signature::arca_decode(reader)?,
        })
    }
}
