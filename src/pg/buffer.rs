//! Big-endian byte codec used by every protocol message.
//!
//! `BufferReader` walks a received message body with a cursor; `BufferWriter`
//! builds an outgoing message and grows its storage as needed.

use bytes::{Bytes, BytesMut};

use crate::error::{Error, PgResult};

// ============================================================================
// Reader
// ============================================================================

/// Cursor over an immutable message body.
#[derive(Debug, Clone)]
pub struct BufferReader {
    buffer: Bytes,
    index: usize,
}

impl BufferReader {
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer, index: 0 }
    }

    /// Number of bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.index
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, n: usize) -> PgResult<()> {
        if self.remaining() < n {
            return Err(Error::packet(format!(
                "Truncated message: need {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        Ok(())
    }

    /// Read `n` raw bytes. Zero-copy: the result shares the message buffer.
    pub fn read(&mut self, n: usize) -> PgResult<Bytes> {
        self.ensure(n)?;
        let out = self.buffer.slice(self.index..self.index + n);
        self.index += n;
        Ok(out)
    }

    /// Read everything left in the buffer.
    pub fn read_rest(&mut self) -> Bytes {
        let out = self.buffer.slice(self.index..);
        self.index = self.buffer.len();
        out
    }

    /// Read text up to `delim`, consuming the delimiter as well.
    ///
    /// A missing delimiter consumes the rest of the buffer.
    pub fn read_slice(&mut self, delim: u8) -> PgResult<String> {
        let rest = &self.buffer[self.index..];
        let (end, consumed) = match rest.iter().position(|&b| b == delim) {
            Some(pos) => (pos, pos + 1),
            None => (rest.len(), rest.len()),
        };
        let text = utf8(&rest[..end])?;
        self.index += consumed;
        Ok(text)
    }

    /// Read a null-terminated string. Unlike `read_slice`, the terminator is
    /// mandatory: protocol strings without one mean the body is truncated.
    pub fn read_cstring(&mut self) -> PgResult<String> {
        let rest = &self.buffer[self.index..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::packet("Missing null terminator in string"))?;
        let text = utf8(&rest[..end])?;
        self.index += end + 1;
        Ok(text)
    }

    pub fn read_string(&mut self, n: usize) -> PgResult<String> {
        let raw = self.read(n)?;
        utf8(&raw)
    }

    pub fn read_i8(&mut self) -> PgResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> PgResult<i16> {
        Ok(i16::from_be_bytes(self.array()?))
    }

    pub fn read_i32(&mut self) -> PgResult<i32> {
        Ok(i32::from_be_bytes(self.array()?))
    }

    pub fn read_u8(&mut self) -> PgResult<u8> {
        self.ensure(1)?;
        let b = self.buffer[self.index];
        self.index += 1;
        Ok(b)
    }

    pub fn read_u16(&mut self) -> PgResult<u16> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn read_u32(&mut self) -> PgResult<u32> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    fn array<const N: usize>(&mut self) -> PgResult<[u8; N]> {
        self.ensure(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[self.index..self.index + N]);
        self.index += N;
        Ok(out)
    }
}

fn utf8(raw: &[u8]) -> PgResult<String> {
    std::str::from_utf8(raw)
        .map(str::to_owned)
        .map_err(|e| Error::packet(format!("Invalid UTF-8 in message: {}", e)))
}

// ============================================================================
// Writer
// ============================================================================

/// Growable big-endian message builder. The cursor is the written length.
#[derive(Debug, Default)]
pub struct BufferWriter {
    buffer: BytesMut,
}

impl BufferWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Make room for `additional` bytes, growing by at least half the
    /// current capacity when the remainder is too small.
    fn enlarge(&mut self, additional: usize) {
        let remaining = self.buffer.capacity() - self.buffer.len();
        if remaining < additional {
            let capacity = self.buffer.capacity();
            let target = capacity + (capacity >> 1) + additional;
            self.buffer.reserve(target - self.buffer.len());
        }
    }

    pub fn write(&mut self, bytes: &[u8]) -> &mut Self {
        self.enlarge(bytes.len());
        self.buffer.extend_from_slice(bytes);
        self
    }

    pub fn write_string(&mut self, s: &str) -> &mut Self {
        self.write(s.as_bytes())
    }

    /// Write `s` followed by a null terminator.
    pub fn write_cstring(&mut self, s: &str) -> &mut Self {
        self.write(s.as_bytes()).write_u8(0)
    }

    pub fn write_i8(&mut self, v: i8) -> &mut Self {
        self.write(&v.to_be_bytes())
    }

    pub fn write_i16(&mut self, v: i16) -> &mut Self {
        self.write(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> &mut Self {
        self.write(&v.to_be_bytes())
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.write(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> &mut Self {
        self.write(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.write(&v.to_be_bytes())
    }

    /// Overwrite four already-written bytes at `at` (length back-patching).
    pub fn patch_i32(&mut self, at: usize, v: i32) {
        self.buffer[at..at + 4].copy_from_slice(&v.to_be_bytes());
    }

    pub fn freeze(self) -> Bytes {
        self.buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int8_sign_extension() {
        let mut reader = BufferReader::new(Bytes::from_static(&[0xFF, 0x7F, 0x80]));
        assert_eq!(reader.read_i8().unwrap(), -1);
        assert_eq!(reader.read_i8().unwrap(), 127);
        assert_eq!(reader.read_i8().unwrap(), -128);
    }

    #[test]
    fn test_fixed_width_reads_advance_cursor() {
        let mut w = BufferWriter::new();
        w.write_i16(-2).write_i32(-70000).write_u16(65535).write_u32(4_000_000_000);
        let mut r = BufferReader::new(w.freeze());

        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.position(), 2);
        assert_eq!(r.read_i32().unwrap(), -70000);
        assert_eq!(r.read_u16().unwrap(), 65535);
        assert_eq!(r.read_u32().unwrap(), 4_000_000_000);
        assert!(r.is_empty());
    }

    #[test]
    fn test_read_slice_without_delimiter_consumes_rest() {
        let mut r = BufferReader::new(Bytes::from_static(b"abc\0def"));
        assert_eq!(r.read_slice(0).unwrap(), "abc");
        assert_eq!(r.position(), 4);
        assert_eq!(r.read_slice(0).unwrap(), "def");
        assert!(r.is_empty());
    }

    #[test]
    fn test_read_cstring_requires_terminator() {
        let mut r = BufferReader::new(Bytes::from_static(b"abc"));
        assert!(matches!(r.read_cstring(), Err(Error::Packet(_))));
    }

    #[test]
    fn test_truncated_read_is_packet_error() {
        let mut r = BufferReader::new(Bytes::from_static(&[0, 1]));
        assert!(matches!(r.read_i32(), Err(Error::Packet(_))));
        // nothing consumed on failure
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_writer_growth_keeps_bytes() {
        let mut w = BufferWriter::with_capacity(3);
        let mut expected = Vec::new();
        for i in 0..200u8 {
            w.write_u8(i);
            expected.push(i);
        }
        w.write_string("tail");
        expected.extend_from_slice(b"tail");

        assert_eq!(w.len(), 204);
        assert!(w.capacity() >= 204);
        assert_eq!(w.as_slice(), &expected[..]);
    }

    #[test]
    fn test_patch_length() {
        let mut w = BufferWriter::new();
        w.write_u8(b'Q').write_i32(0).write_cstring("SELECT 1");
        let len = (w.len() - 1) as i32;
        w.patch_i32(1, len);
        assert_eq!(&w.as_slice()[1..5], &13i32.to_be_bytes());
    }
}
