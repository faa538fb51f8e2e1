//! # Byte Cursor
//!
//! Bounds-checked access to a captured frame. Every decoder in
//! [`crate::protocols`] reads through [`ByteReader`] or [`Cursor`]; none of
//! them index the frame directly.
//!
//! A reader is created over the valid portion of the receive buffer (the
//! byte count reported by the capture source), so a read that would step
//! into stale bytes left over from a previous, longer frame fails with
//! [`DecodeError::OutOfBounds`] instead of returning garbage.

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while decoding a frame.
///
/// These never escape the classifier: a malformed field degrades the
/// resulting event, it does not abort the capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("read of {width} byte(s) at offset {offset} exceeds bound {bound}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        bound: usize,
    },

    #[error("unsupported IP version {0}")]
    UnsupportedVersion(u8),

    #[error("IPv4 header length {0} is below the 20-byte minimum")]
    InvalidHeaderLength(usize),

    #[error("DNS label length {0} exceeds 63")]
    LabelTooLong(u8),

    #[error("DNS name exceeds {0} compression jumps")]
    TooManyJumps(usize),

    #[error("DNS name exceeds {0} labels")]
    TooManyLabels(usize),
}

// ---------------------------------------------------------------------------
// ByteReader
// ---------------------------------------------------------------------------

/// Random-access reader over a bounded byte slice.
///
/// All offsets are relative to the start of the slice. Reads are
/// big-endian (network byte order).
#[derive(Debug, Clone, Copy)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    /// Create a reader over `buf`, limited to its first `bound` bytes.
    ///
    /// `bound` larger than the slice is clamped to the slice length.
    pub fn new(buf: &'a [u8], bound: usize) -> Self {
        Self {
            buf: &buf[..bound.min(buf.len())],
        }
    }

    /// Create a reader over the whole slice.
    pub fn over(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Number of readable bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The readable bytes.
    pub fn as_slice(&self) -> &'a [u8] {
        self.buf
    }

    /// Check that `width` bytes are readable at `offset`.
    pub fn check(&self, offset: usize, width: usize) -> Result<(), DecodeError> {
        match offset.checked_add(width) {
            Some(end) if end <= self.buf.len() => Ok(()),
            _ => Err(DecodeError::OutOfBounds {
                offset,
                width,
                bound: self.buf.len(),
            }),
        }
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, DecodeError> {
        self.check(offset, 1)?;
        Ok(self.buf[offset])
    }

    pub fn u16_at(&self, offset: usize) -> Result<u16, DecodeError> {
        self.check(offset, 2)?;
        Ok(u16::from_be_bytes([self.buf[offset], self.buf[offset + 1]]))
    }

    pub fn u32_at(&self, offset: usize) -> Result<u32, DecodeError> {
        self.check(offset, 4)?;
        Ok(u32::from_be_bytes([
            self.buf[offset],
            self.buf[offset + 1],
            self.buf[offset + 2],
            self.buf[offset + 3],
        ]))
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn bytes_at(&self, offset: usize, len: usize) -> Result<&'a [u8], DecodeError> {
        self.check(offset, len)?;
        Ok(&self.buf[offset..offset + len])
    }

    /// Decode `len` bytes at `offset` as UTF-8, replacing invalid sequences.
    pub fn str_at(&self, offset: usize, len: usize) -> Result<String, DecodeError> {
        let bytes = self.bytes_at(offset, len)?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// A reader over `len` bytes starting at `offset`, with offsets rebased
    /// to zero.
    pub fn sub(&self, offset: usize, len: usize) -> Result<ByteReader<'a>, DecodeError> {
        Ok(ByteReader::over(self.bytes_at(offset, len)?))
    }

    /// A reader over everything from `offset` to the end.
    pub fn tail(&self, offset: usize) -> Result<ByteReader<'a>, DecodeError> {
        if offset > self.buf.len() {
            return Err(DecodeError::OutOfBounds {
                offset,
                width: 0,
                bound: self.buf.len(),
            });
        }
        Ok(ByteReader::over(&self.buf[offset..]))
    }

    /// A sequential cursor positioned at `offset`.
    pub fn cursor_at(&self, offset: usize) -> Cursor<'a> {
        Cursor {
            reader: *self,
            pos: offset,
        }
    }
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

/// Sequential reader used by the length-prefixed walks (TLS extensions,
/// DNS sections).
///
/// The position may be moved past the end by [`Cursor::skip`]; the next
/// read then fails rather than the skip itself, which keeps "skip a
/// length-prefixed field" a single call.
#[derive(Debug, Clone, Copy)]
pub struct Cursor<'a> {
    reader: ByteReader<'a>,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader::over(buf).cursor_at(0)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Bytes left between the position and the bound (zero when past it).
    pub fn remaining(&self) -> usize {
        self.reader.len().saturating_sub(self.pos)
    }

    pub fn skip(&mut self, n: usize) {
        self.pos = self.pos.saturating_add(n);
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let v = self.reader.u8_at(self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let v = self.reader.u16_at(self.pos)?;
        self.pos += 2;
        Ok(v)
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let v = self.reader.bytes_at(self.pos, len)?;
        self.pos += len;
        Ok(v)
    }

    /// Skip a field whose length is given by a one-byte prefix.
    pub fn skip_u8_prefixed(&mut self) -> Result<(), DecodeError> {
        let len = self.read_u8()? as usize;
        self.skip(len);
        Ok(())
    }

    /// Skip a field whose length is given by a two-byte prefix.
    pub fn skip_u16_prefixed(&mut self) -> Result<(), DecodeError> {
        let len = self.read_u16()? as usize;
        self.skip(len);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
