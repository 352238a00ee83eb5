//! Public key and signature wire types.
//!
//! Curve math lives outside the core; these types carry the encoded
//! components and know their consensus wire layout. A key's identity is
//! the SHA-256 of its plain serialization.

use arca_base::{sha256, ArcaDecode, ArcaEncode, ArcaRead, ArcaWrite, CodecError, Hash32};
use serde::{Deserialize, Serialize};

/// An encoded public key: curve id plus the two coordinate buffers.
///
/// The wire ("plain") form is `type_id u16 · x (prefixed) · y (prefixed)`;
/// it doubles as the to-be-signed serialization of a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Public {
    pub type_id: u16,
    pub x: Vec<u8>,
    pub y: Vec<u8>,
}

impl Public {
    pub fn new(type_id: u16, x: Vec<u8>, y: Vec<u8>) -> Self {
        Self { type_id, x, y }
    }

    /// Parse a key from its plain serialization.
    pub fn from_plain(bytes: &[u8]) -> Result<Self, CodecError> {
        Self::from_wire(bytes)
    }

    /// SHA-256 over the plain serialization; the account-level identity
    /// of this key.
    pub fn key_hash(&self) -> Hash32 {
        sha256(&self.to_wire())
    }
}

impl ArcaEncode for Public {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u16(self.type_id);
        writer.write_prefixed(&self.x);
        writer.write_prefixed(&self.y);
    }
}

impl ArcaDecode for Public {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            type_id: reader.read_u16()?,
            x: reader.read_prefixed()?,
            y: reader.read_prefixed()?,
        })
    }
}

/// An ECDSA signature as its two encoded components.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    pub r: Vec<u8>,
    pub s: Vec<u8>,
}

impl ArcaEncode for Signature {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_prefixed(&self.r);
        writer.write_prefixed(&self.s);
    }
}

impl ArcaDecode for Signature {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        Ok(Self {
            r: reader.read_prefixed()?,
            s: reader.read_prefixed()?,
        })
    }
}

/// Curve backend seam. The core hands over the public key, the canonical
/// to-be-signed bytes and the signature; the embedder supplies the math.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, public: &Public, message: &[u8], signature: &Signature) -> bool;
}

/// Accepts every structurally well-formed signature. Stands in where no
/// curve backend is wired up (tests, local simulation).
#[derive(Debug, Clone, Copy, Default)]
pub struct PermissiveVerifier;

impl SignatureVerifier for PermissiveVerifier {
    fn verify(&self, _public: &Public, _message: &[u8], signature: &Signature) -> bool {
        !signature.r.is_empty() && !signature.s.is_empty()
    }
}
