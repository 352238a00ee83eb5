//! Shared primitives for the arca node: the deterministic binary wire
//! codec and the SHA-256 helpers every consensus structure hashes with.

pub mod encoding;
pub mod hash;

pub use encoding::{
    decode_list, encode_list, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError, SliceReader,
};
pub use hash::{empty_hash, sha256, sha256_pair, Hash32};
