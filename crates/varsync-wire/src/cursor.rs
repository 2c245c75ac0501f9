//! Bounds-checked reading and length-prefixed writing
//!
//! All integers on the wire are little-endian.

use bytes::{Buf, BufMut, BytesMut};

use varsync_core::{VarsyncError, VarsyncResult};

/// Cursor over a received payload. Every read checks the remaining length
/// and fails with `BufferTooShort` instead of panicking.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        WireReader { buf }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize) -> VarsyncResult<()> {
        if self.buf.remaining() < n {
            return Err(VarsyncError::BufferTooShort {
                expected: n,
                actual: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u8(&mut self) -> VarsyncResult<u8> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn u16(&mut self) -> VarsyncResult<u16> {
        self.need(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u32(&mut self) -> VarsyncResult<u32> {
        self.need(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u64(&mut self) -> VarsyncResult<u64> {
        self.need(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn i64(&mut self) -> VarsyncResult<i64> {
        self.need(8)?;
        Ok(self.buf.get_i64_le())
    }

    /// Borrow the next `len` bytes
    pub fn bytes(&mut self, len: usize) -> VarsyncResult<&'a [u8]> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    /// String with a u16 length prefix
    pub fn short_string(&mut self) -> VarsyncResult<String> {
        let len = self.u16()? as usize;
        let raw = self.bytes(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| VarsyncError::InvalidWireFormat("String is not valid UTF-8".into()))
    }

    /// Element count, capped by what the remaining bytes could hold
    pub fn count(&mut self, min_element_size: usize) -> VarsyncResult<usize> {
        let count = self.u32()? as usize;
        let max = self.remaining() / min_element_size.max(1);
        if count > max {
            return Err(VarsyncError::InvalidWireFormat(format!(
                "Element count {} exceeds payload",
                count
            )));
        }
        Ok(count)
    }
}

/// Write a string with a u16 length prefix
pub fn put_short_string(buf: &mut BytesMut, s: &str) -> VarsyncResult<()> {
    let len = u16::try_from(s.len())
        .map_err(|_| VarsyncError::InvalidWireFormat(format!("String too long: {}", s.len())))?;
    buf.put_u16_le(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

/// Write an element count
pub fn put_count(buf: &mut BytesMut, count: usize) -> VarsyncResult<()> {
    let count = u32::try_from(count)
        .map_err(|_| VarsyncError::InvalidWireFormat(format!("Too many elements: {}", count)))?;
    buf.put_u32_le(count);
    Ok(())
}
