//! Block assembly, the chained operations hash and the block hash.

use arca_base::{
    decode_list, encode_list, sha256, sha256_pair, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite,
    CodecError, Hash32,
};
use sha2::{Digest, Sha256};

use crate::account::{Account, AccountHashBuffer};
use crate::error::StateError;
use crate::keys::Public;
use crate::safebox::ACCOUNTS_PER_BLOCK;
use crate::tx::Tx;

/// Header tag when the header is serialized alone.
pub const HEADER_ONLY: u8 = 3;
/// Header tag when the header is followed by its operations.
pub const HEADER_WITH_OPERATIONS: u8 = 2;

/// Initial per-block miner reward.
pub const REWARD_INITIAL: u64 = 500_000;
/// Reward halves every this many blocks.
pub const REWARD_HALVING_INTERVAL: u32 = 420_480;
/// Reward floor.
pub const REWARD_MIN: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

/// Protocol version stamped into every assembled header.
pub const BLOCK_VERSION: Version = Version { major: 1, minor: 1 };

impl ArcaEncode for Version {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u16(self.major);
        writer.write_u16(self.minor);
    }
}

impl ArcaDecode for Version {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            major: reader.read_u16()?,
            minor: reader.read_u16()?,
        })
    }
}

/// Wire form of a block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBlockHeader {
    pub header_only: u8,
    pub version: Version,
    pub index: u32,
    /// Miner public key in plain serialization, carried prefixed.
    pub miner: Vec<u8>,
    pub reward: u64,
    pub fee: u64,
    pub time: u32,
    pub target: u32,
    pub nonce: u32,
    pub payload: Vec<u8>,
    pub prev_safebox_hash: Vec<u8>,
    pub operations_hash: Vec<u8>,
    pub pow: Vec<u8>,
}

impl ArcaEncode for SerializedBlockHeader {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u8(self.header_only);
        self.version.arca_encode(writer);
        writer.write_u32(self.index);
        writer.write_prefixed(&self.miner);
        writer.write_u64(self.reward);
        writer.write_u64(self.fee);
        writer.write_u32(self.time);
        writer.write_u32(self.target);
        writer.write_u32(self.nonce);
        writer.write_prefixed(&self.payload);
        writer.write_prefixed(&self.prev_safebox_hash);
        writer.write_prefixed(&self.operations_hash);
        writer.write_prefixed(&self.pow);
    }
}

impl ArcaDecode for SerializedBlockHeader {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            header_only: reader.read_u8()?,
            version: Version::arca_decode(reader)?,
            index: reader.read_u32()?,
            miner: reader.read_prefixed()?,
            reward: reader.read_u64()?,
            fee: reader.read_u64()?,
            time: reader.read_u32()?,
            target: reader.read_u32()?,
            nonce: reader.read_u32()?,
            payload: reader.read_prefixed()?,
            prev_safebox_hash: reader.read_prefixed()?,
            operations_hash: reader.read_prefixed()?,
            pow: reader.read_prefixed()?,
        })
    }
}

/// Wire form of a full block: header plus ordered operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedBlock {
    pub header: SerializedBlockHeader,
    pub operations: Vec<Tx>,
}

impl ArcaEncode for SerializedBlock {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        self.header.arca_encode(writer);
        encode_list(writer, &self.operations);
    }
}

impl ArcaDecode for SerializedBlock {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            header: SerializedBlockHeader::arca_decode(reader)?,
            operations: decode_list(reader)?,
        })
    }
}

/// Chained digest over the ordered operations.
///
/// The accumulator seeds each round as a prefix of the next digest:
/// `acc ← SHA256(acc ‖ SHA256(fields(op)))`, starting from `SHA256("")`.
/// Consensus construction; the shape is deliberate and must not be
/// "simplified" into a plain fold.
pub fn operations_hash(operations: &[Tx]) -> Hash32 {
    let mut acc = sha256(b"");
    for op in operations {
        let mut inner = Sha256::new();
        let mut fields = Vec::new();
        op.encode_underlying(&mut fields);
        inner.update(&fields);
        let digest: Hash32 = inner.finalize().into();
        acc = sha256_pair(&acc, &digest);
    }
    acc
}

/// Miner reward at a block index: halving schedule with a floor.
pub fn reward_at(index: u32) -> u64 {
    let halvings = index / REWARD_HALVING_INTERVAL;
    let reward = if halvings >= u64::BITS {
        0
    } else {
        REWARD_INITIAL >> halvings
    };
    reward.max(REWARD_MIN)
}

/// Assembly input for a block.
#[derive(Debug, Clone)]
pub struct BlockMeta {
    pub index: u32,
    pub miner: Public,
    pub timestamp: u32,
    pub target: u32,
    pub nonce: u32,
    pub payload: Vec<u8>,
    pub prev_safebox_hash: Hash32,
    pub operations: Vec<Tx>,
}

/// A block with its derived values: fee total, reward, operations hash
/// and the batch of accounts it mints.
#[derive(Debug, Clone)]
pub struct Block {
    meta: BlockMeta,
    operations_hash: Hash32,
    fee: u64,
    reward: u64,
    minted: Vec<Account>,
}

/// Input layout of the block hash.
struct BlockHashBuffer {
    index: u32,
    accounts: Vec<AccountHashBuffer>,
    timestamp: u32,
}

impl ArcaEncode for BlockHashBuffer {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(self.index);
        encode_list(writer, &self.accounts);
        writer.write_u32(self.timestamp);
    }
}

impl Block {
    pub fn new(meta: BlockMeta) -> Self {
        let fee = meta.operations.iter().map(Tx::fee).sum();
        let operations_hash = operations_hash(&meta.operations);
        let reward = reward_at(meta.index);

        // Each block mints a fixed batch of fresh accounts owned by the
        // miner key, numbered densely after all previously minted ones.
        let base = meta.index * ACCOUNTS_PER_BLOCK;
        let minted = (0..ACCOUNTS_PER_BLOCK)
            .map(|i| Account::new(base + i, meta.miner.clone(), meta.index))
            .collect();

        Self {
            meta,
            operations_hash,
            fee,
            reward,
            minted,
        }
    }

    /// Rebuild a block from its wire form, checking the header against
    /// the operations it carries.
    pub fn from_serialized(serialized: &SerializedBlock) -> Result<Self, StateError> {
        let header = &serialized.header;

        let miner = Public::from_plain(&header.miner)
            .map_err(|_| StateError::MalformedHeader("miner key"))?;
        let prev_safebox_hash: Hash32 = header
            .prev_safebox_hash
            .as_slice()
            .try_into()
            .map_err(|_| StateError::MalformedHeader("prev safebox hash"))?;

        let declared_fee = header.fee;
        let actual_fee: u64 = serialized.operations.iter().map(Tx::fee).sum();
        if declared_fee != actual_fee {
            return Err(StateError::FeeMismatch {
                index: header.index,
                declared: declared_fee,
                actual: actual_fee,
            });
        }

        let ops_hash = operations_hash(&serialized.operations);
        if header.operations_hash != ops_hash {
            return Err(StateError::OperationsHashMismatch(header.index));
        }

        Ok(Self::new(BlockMeta {
            index: header.index,
            miner,
            timestamp: header.time,
            target: header.target,
            nonce: header.nonce,
            payload: header.payload.clone(),
            prev_safebox_hash,
            operations: serialized.operations.clone(),
        }))
    }

    pub fn index(&self) -> u32 {
        self.meta.index
    }

    pub fn timestamp(&self) -> u32 {
        self.meta.timestamp
    }

    pub fn miner(&self) -> &Public {
        &self.meta.miner
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    pub fn reward(&self) -> u64 {
        self.reward
    }

    pub fn operations(&self) -> &[Tx] {
        &self.meta.operations
    }

    pub fn operations_hash(&self) -> Hash32 {
        self.operations_hash
    }

    pub fn prev_safebox_hash(&self) -> Hash32 {
        self.meta.prev_safebox_hash
    }

    /// The fresh accounts this block mints, balances still zero; the
    /// safebox credits the reward on commit.
    pub fn minted(&self) -> &[Account] {
        &self.minted
    }

    /// `SHA256(index ‖ minted account buffers ‖ timestamp)`.
    pub fn hash(&self) -> Hash32 {
        let buffer = BlockHashBuffer {
            index: self.meta.index,
            accounts: self.minted.iter().map(Account::hash_buffer).collect(),
            timestamp: self.meta.timestamp,
        };
        sha256(&buffer.to_wire())
    }

    pub fn serialize_header(&self, will_append_operations: bool) -> SerializedBlockHeader {
        SerializedBlockHeader {
            header_only: if will_append_operations {
                HEADER_WITH_OPERATIONS
            } else {
                HEADER_ONLY
            },
            version: BLOCK_VERSION,
            index: self.meta.index,
            miner: self.meta.miner.to_wire(),
            reward: self.reward,
            fee: self.fee,
            time: self.meta.timestamp,
            target: self.meta.target,
            nonce: self.meta.nonce,
            payload: self.meta.payload.clone(),
            prev_safebox_hash: self.meta.prev_safebox_hash.to_vec(),
            operations_hash: self.operations_hash.to_vec(),
            // PoW bytes travel opaquely; their hashing scheme is not part
            // of the core and nothing here validates them.
            pow: Vec::new(),
        }
    }

    pub fn serialize(&self) -> SerializedBlock {
        SerializedBlock {
            header: self.serialize_header(true),
            operations: self.meta.operations.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Signature;
    use crate::tx::Transfer;

    fn miner() -> Public {
        Public::new(714, vec![5; 4], vec![6; 4])
    }

    fn transfer(amount: u64, fee: u64) -> Tx {
        Tx::Transfer(Transfer {
            source: 0,
            op_id: 1,
            dest: 1,
            amount,
            fee,
            payload: vec![],
            source_public: miner(),
            signature: Signature {
                r: vec![1],
                s: vec![2],
            },
        })
    }

    fn block(index: u32, operations: Vec<Tx>) -> Block {
        Block::new(BlockMeta {
            index,
            miner: miner(),
            timestamp: 1_530_000_000,
            target: 0x1D00_FFFF,
            nonce: 42,
            payload: vec![],
            prev_safebox_hash: arca_base::hash::empty_hash(),
            operations,
        })
    }

    #[test]
    fn empty_operations_hash_is_empty_sha256() {
        assert_eq!(
            hex::encode(operations_hash(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn operations_hash_chains_accumulator() {
        let ops = vec![transfer(10, 1), transfer(20, 2)];

        // Reproduce the fold by hand, one round at a time.
        let mut fields = Vec::new();
        ops[0].encode_underlying(&mut fields);
        let step1 = sha256_pair(&sha256(b""), &sha256(&fields));

        let mut fields = Vec::new();
        ops[1].encode_underlying(&mut fields);
        let step2 = sha256_pair(&step1, &sha256(&fields));

        assert_eq!(operations_hash(&ops), step2);
        assert_ne!(operations_hash(&ops), operations_hash(&ops[..1]));
    }

    #[test]
    fn operations_hash_is_order_sensitive() {
        let a = transfer(10, 1);
        let b = transfer(20, 2);
        assert_ne!(
            operations_hash(&[a.clone(), b.clone()]),
            operations_hash(&[b, a])
        );
    }

    #[test]
    fn fee_totals_and_minting() {
        let block = block(2, vec![transfer(10, 1), transfer(20, 2)]);
        assert_eq!(block.fee(), 3);
        assert_eq!(block.reward(), REWARD_INITIAL);
        let numbers: Vec<u32> = block.minted().iter().map(|a| a.number).collect();
        assert_eq!(numbers, vec![10, 11, 12, 13, 14]);
        assert!(block.minted().iter().all(|a| a.balance == 0));
    }

    #[test]
    fn reward_halves_with_floor() {
        assert_eq!(reward_at(0), REWARD_INITIAL);
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL - 1), REWARD_INITIAL);
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL), REWARD_INITIAL / 2);
        // Deep into the schedule only the floor remains.
        assert_eq!(reward_at(REWARD_HALVING_INTERVAL * 40), REWARD_MIN);
    }

    #[test]
    fn header_tag_depends_on_operations() {
        let block = block(1, vec![]);
        assert_eq!(block.serialize_header(false).header_only, HEADER_ONLY);
        assert_eq!(
            block.serialize_header(true).header_only,
            HEADER_WITH_OPERATIONS
        );
    }

    #[test]
    fn serialized_block_roundtrip() {
        let block = block(1, vec![transfer(10, 1)]);
        let serialized = block.serialize();
        let wire = serialized.to_wire();
        assert_eq!(SerializedBlock::from_wire(&wire).unwrap(), serialized);
    }

    #[test]
    fn from_serialized_checks_fee() {
        let block = block(1, vec![transfer(10, 1)]);
        let mut serialized = block.serialize();
        serialized.header.fee = 99;
        let err = Block::from_serialized(&serialized).unwrap_err();
        assert!(matches!(err, StateError::FeeMismatch { .. }));
    }

    #[test]
    fn from_serialized_checks_operations_hash() {
        let block = block(1, vec![transfer(10, 1)]);
        let mut serialized = block.serialize();
        serialized.operations.push(transfer(5, 0));
        serialized.header.fee = 1; // keep fee consistent with the tamper
        let err = Block::from_serialized(&serialized).unwrap_err();
        assert_eq!(err, StateError::OperationsHashMismatch(1));
    }

    #[test]
    fn block_hash_covers_timestamp() {
        let a = block(1, vec![]);
        let mut meta_b = a.meta.clone();
        meta_b.timestamp += 1;
        let b = Block::new(meta_b);
        assert_ne!(a.hash(), b.hash());
    }
}
