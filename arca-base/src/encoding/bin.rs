use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Error returned when a value cannot be decoded from the arca wire format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("arca-bin: unexpected end of input (needed {needed}, remaining {remaining})")]
    Truncated { needed: usize, remaining: usize },

    #[error("arca-bin: length prefix {len} exceeds remaining input {remaining}")]
    LengthOverflow { len: usize, remaining: usize },

    #[error("arca-bin: unknown {what} tag {tag}")]
    InvalidVariant { what: &'static str, tag: u32 },

    #[error("arca-bin: invalid utf-8 in string field")]
    InvalidUtf8,
}

/// All values that can be encoded into the arca wire format implement this.
///
/// Encoding is total and deterministic: the same value produces the same
/// bytes on every host and every run. Fields of a composite type are
/// written in declared order, integers little-endian.
pub trait ArcaEncode {
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W);

    #[inline]
    fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.arca_encode(&mut buf);
        buf
    }
}

/// Values that can be decoded from the arca wire format implement this.
pub trait ArcaDecode: Sized {
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError>;

    /// Decode from the front of an in-memory buffer. Trailing bytes are
    /// left for the caller; wire payloads are framed externally.
    #[inline]
    fn from_wire(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = SliceReader::new(bytes);
        Self::arca_decode(&mut reader)
    }
}

/// Writer abstraction over the destination buffer.
pub trait ArcaWrite {
    /// Append raw bytes, no length prefix.
    fn write_raw(&mut self, bytes: &[u8]);

    /// Number of bytes written so far.
    fn bytes_written(&self) -> usize;

    #[inline]
    fn write_u8(&mut self, value: u8) {
        self.write_raw(&value.to_le_bytes());
    }

    #[inline]
    fn write_u16(&mut self, value: u16) {
        self.write_raw(&value.to_le_bytes());
    }

    #[inline]
    fn write_u32(&mut self, value: u32) {
        self.write_raw(&value.to_le_bytes());
    }

    #[inline]
    fn write_u64(&mut self, value: u64) {
        self.write_raw(&value.to_le_bytes());
    }

    /// Byte sequence with its u16 length prefix. Prefixed fields stay
    /// under 64 KiB on the wire; longer inputs are a caller bug.
    #[inline]
    fn write_prefixed(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= u16::MAX as usize);
        self.write_u16(bytes.len() as u16);
        self.write_raw(bytes);
    }
}

/// Reader abstraction over the source buffer.
pub trait ArcaRead {
    /// Read exactly `buf.len()` bytes into the provided slice.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), CodecError>;

    /// Bytes left in this reader.
    fn remaining(&self) -> usize;

    #[inline]
    fn read_u8(&mut self) -> Result<u8, CodecError> {
        let mut buf = [0u8; 1];
        self.read_into(&mut buf)?;
        Ok(buf[0])
    }

    #[inline]
    fn read_u16(&mut self) -> Result<u16, CodecError> {
        let mut buf = [0u8; 2];
        self.read_into(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    #[inline]
    fn read_u32(&mut self) -> Result<u32, CodecError> {
        let mut buf = [0u8; 4];
        self.read_into(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    #[inline]
    fn read_u64(&mut self) -> Result<u64, CodecError> {
        let mut buf = [0u8; 8];
        self.read_into(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    /// Fixed-width byte run, no prefix.
    #[inline]
    fn read_raw(&mut self, len: usize) -> Result<Vec<u8>, CodecError> {
        if len > self.remaining() {
            return Err(CodecError::Truncated {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let mut buf = vec![0u8; len];
        self.read_into(buf.as_mut_slice())?;
        Ok(buf)
    }

    /// Byte sequence behind a u16 length prefix. The raw prefix bits are
    /// unsigned; a prefix larger than the remaining input is rejected
    /// before any allocation.
    #[inline]
    fn read_prefixed(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_u16()? as usize;
        if len > self.remaining() {
            return Err(CodecError::LengthOverflow {
                len,
                remaining: self.remaining(),
            });
        }
        let mut buf = vec![0u8; len];
        self.read_into(buf.as_mut_slice())?;
        Ok(buf)
    }
}

/// Reader over an in-memory byte slice.
pub struct SliceReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> SliceReader<'a> {
    #[inline]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    #[inline]
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl ArcaRead for SliceReader<'_> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        if self.remaining() < buf.len() {
            return Err(CodecError::Truncated {
                needed: buf.len(),
                remaining: self.remaining(),
            });
        }

        let end = self.offset + buf.len();
        buf.copy_from_slice(&self.buf[self.offset..end]);
        self.offset = end;
        Ok(())
    }

    #[inline]
    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

impl ArcaWrite for Vec<u8> {
    #[inline]
    fn write_raw(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    #[inline]
    fn bytes_written(&self) -> usize {
        self.len()
    }
}

impl ArcaWrite for BytesMut {
    #[inline]
    fn write_raw(&mut self, bytes: &[u8]) {
        self.put_slice(bytes);
    }

    #[inline]
    fn bytes_written(&self) -> usize {
        BytesMut::len(self)
    }
}

impl ArcaRead for Bytes {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<(), CodecError> {
        if <Bytes as Buf>::remaining(self) < buf.len() {
            return Err(CodecError::Truncated {
                needed: buf.len(),
                remaining: <Bytes as Buf>::remaining(self),
            });
        }

        self.copy_to_slice(buf);
        Ok(())
    }

    #[inline]
    fn remaining(&self) -> usize {
        <Bytes as Buf>::remaining(self)
    }
}

impl ArcaEncode for u8 {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u8(*self);
    }
}

impl ArcaDecode for u8 {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        reader.read_u8()
    }
}

impl ArcaEncode for u16 {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u16(*self);
    }
}

impl ArcaDecode for u16 {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        reader.read_u16()
    }
}

impl ArcaEncode for u32 {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u32(*self);
    }
}

impl ArcaDecode for u32 {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        reader.read_u32()
    }
}

impl ArcaEncode for u64 {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_u64(*self);
    }
}

impl ArcaDecode for u64 {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        reader.read_u64()
    }
}

impl ArcaEncode for [u8] {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_prefixed(self);
    }
}

impl ArcaEncode for Vec<u8> {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_prefixed(self);
    }
}

impl ArcaDecode for Vec<u8> {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        reader.read_prefixed()
    }
}

impl ArcaEncode for String {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_prefixed(self.as_bytes());
    }
}

impl ArcaEncode for str {
    #[inline]
    fn arca_encode<W: ArcaWrite>(&self, writer: &mut W) {
        writer.write_prefixed(self.as_bytes());
    }
}

impl ArcaDecode for String {
    #[inline]
    fn arca_decode<R: ArcaRead>(reader: &mut R) -> Result<Self, CodecError> {
        let buf = reader.read_prefixed()?;
        String::from_utf8(buf).map_err(|_| CodecError::InvalidUtf8)
    }
}

/// List of non-byte elements: u32 count, then the elements back to back.
#[inline]
pub fn encode_list<W: ArcaWrite, T: ArcaEncode>(writer: &mut W, items: &[T]) {
    writer.write_u32(items.len() as u32);
    for item in items {
        item.arca_encode(writer);
    }
}

#[inline]
pub fn decode_list<R: ArcaRead, T: ArcaDecode>(reader: &mut R) -> Result<Vec<T>, CodecError> {
    let count = reader.read_u32()? as usize;
    // Every element occupies at least one byte, so a count beyond the
    // remaining input can never decode; reject before allocating.
    if count > reader.remaining() {
        return Err(CodecError::LengthOverflow {
            len: count,
            remaining: reader.remaining(),
        });
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        items.push(T::arca_decode(reader)?);
    }
    Ok(items)
}
