//! Little-endian cursor and writer helpers shared by every message codec.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;

/// The undefined address: all bits set.
pub const UNDEFINED_ADDR: u64 = u64::MAX;

/// A forward-only reader over an encoded message.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn ensure(&self, n: usize) -> Result<(), FormatError> {
        match self.pos.checked_add(n) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(FormatError::UnexpectedEof {
                expected: self.pos.saturating_add(n),
                available: self.data.len(),
            }),
        }
    }

    pub fn skip(&mut self, n: usize) -> Result<(), FormatError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    /// Read an unsigned integer of `n` bytes (1 to 8).
    pub fn uint(&mut self, n: usize) -> Result<u64, FormatError> {
        if n == 0 || n > 8 {
            return Err(FormatError::InvalidField {
                what: "integer width",
                value: n as u64,
            });
        }
        Ok(LittleEndian::read_uint(self.bytes(n)?, n))
    }

    /// Read a length field.
    pub fn length(&mut self, size: u8) -> Result<u64, FormatError> {
        match size {
            2 | 4 | 8 => self.uint(size as usize),
            _ => Err(FormatError::InvalidLengthSize(size)),
        }
    }

    /// Read an address field; all-ones decodes as `None`.
    pub fn addr(&mut self, size: u8) -> Result<Option<u64>, FormatError> {
        match size {
            1 | 2 | 4 | 8 => {
                let raw = self.bytes(size as usize)?;
                if raw.iter().all(|&b| b == 0xFF) {
                    Ok(None)
                } else {
                    Ok(Some(LittleEndian::read_uint(raw, size as usize)))
                }
            }
            _ => Err(FormatError::InvalidOffsetSize(size)),
        }
    }

    /// Read a null-terminated string, consuming the terminator.
    pub fn cstr(&mut self) -> Result<String, FormatError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnexpectedEof {
                expected: self.data.len() + 1,
                available: self.data.len(),
            })?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    /// Advance to the next multiple of `align` relative to `base`.
    pub fn align_to(&mut self, base: usize, align: usize) -> Result<(), FormatError> {
        let rel = self.pos - base;
        let padded = rel.div_ceil(align) * align;
        self.skip(padded - rel)
    }
}

/// Append `value` as an `n`-byte little-endian integer.
pub fn put_uint(buf: &mut Vec<u8>, value: u64, n: usize) {
    let bytes = value.to_le_bytes();
    buf.extend_from_slice(&bytes[..n]);
}

/// Append an address, writing all-ones for `None`.
pub fn put_addr(buf: &mut Vec<u8>, addr: Option<u64>, size: u8) {
    put_uint(buf, addr.unwrap_or(UNDEFINED_ADDR), size as usize);
}

/// Pad `buf` with zeros so that `buf.len() - base` is a multiple of `align`.
pub fn pad_to(buf: &mut Vec<u8>, base: usize, align: usize) {
    let rel = buf.len() - base;
    let padded = rel.div_ceil(align) * align;
    buf.resize(base + padded, 0);
}

/// Smallest number of bytes (1 to 8) that can hold `value`.
pub fn bytes_needed(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(8).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_address_decodes_as_none() {
        let data = [0xFFu8; 8];
        assert_eq!(Cursor::new(&data).addr(8).unwrap(), None);
        let data = 0x1234u64.to_le_bytes();
        assert_eq!(Cursor::new(&data).addr(8).unwrap(), Some(0x1234));
    }

    #[test]
    fn truncated_read_reports_eof() {
        let data = [1u8, 2, 3];
        let mut c = Cursor::new(&data);
        assert_eq!(
            c.u32(),
            Err(FormatError::UnexpectedEof {
                expected: 4,
                available: 3
            })
        );
    }

    #[test]
    fn cstr_consumes_terminator() {
        let data = b"abc\0def\0";
        let mut c = Cursor::new(data);
        assert_eq!(c.cstr().unwrap(), "abc");
        assert_eq!(c.pos(), 4);
        assert_eq!(c.cstr().unwrap(), "def");
    }

    #[test]
    fn minimal_widths() {
        assert_eq!(bytes_needed(0), 1);
        assert_eq!(bytes_needed(255), 1);
        assert_eq!(bytes_needed(256), 2);
        assert_eq!(bytes_needed(u32::MAX as u64 + 1), 5);
    }

    #[test]
    fn padding_is_relative_to_base() {
        let mut buf = vec![9u8; 3];
        buf.push(1);
        pad_to(&mut buf, 3, 8);
        assert_eq!(buf.len(), 11);
    }
}
