//! Version 2 superblock: the fixed 48-byte anchor at the start of a file.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::checksum::{lookup3, verify_trailing};
use crate::codec::{put_addr, Cursor};
use crate::error::FormatError;

pub const HDF5_SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Encoded size with 8-byte offsets.
pub const SUPERBLOCK_V2_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub offset_size: u8,
    pub length_size: u8,
    pub consistency_flags: u8,
    pub base_addr: u64,
    pub extension_addr: Option<u64>,
    /// End of allocated space as last flushed.
    pub eof_addr: u64,
    pub root_addr: u64,
}

impl Superblock {
    pub fn new(root_addr: u64, eof_addr: u64) -> Superblock {
        Superblock {
            offset_size: 8,
            length_size: 8,
            consistency_flags: 0,
            base_addr: 0,
            extension_addr: None,
            eof_addr,
            root_addr,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_V2_SIZE);
        buf.extend_from_slice(&HDF5_SIGNATURE);
        buf.push(2);
        buf.push(self.offset_size);
        buf.push(self.length_size);
        buf.push(self.consistency_flags);
        put_addr(&mut buf, Some(self.base_addr), self.offset_size);
        put_addr(&mut buf, self.extension_addr, self.offset_size);
        put_addr(&mut buf, Some(self.eof_addr), self.offset_size);
        put_addr(&mut buf, Some(self.root_addr), self.offset_size);
        let sum = lookup3(&buf);
        buf.extend_from_slice(&sum.to_le_bytes());
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Superblock, FormatError> {
        let mut cur = Cursor::new(data);
        if cur.bytes(8)? != HDF5_SIGNATURE {
            return Err(FormatError::InvalidSignature("superblock"));
        }
        let version = cur.u8()?;
        if !(2..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                what: "superblock",
                version,
            });
        }
        let offset_size = cur.u8()?;
        let length_size = cur.u8()?;
        if !matches!(offset_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !matches!(length_size, 2 | 4 | 8) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        let consistency_flags = cur.u8()?;
        let undefined = |what| FormatError::InvalidField {
            what,
            value: u64::MAX,
        };
        let base_addr = cur.addr(offset_size)?.ok_or(undefined("base address"))?;
        let extension_addr = cur.addr(offset_size)?;
        let eof_addr = cur.addr(offset_size)?.ok_or(undefined("end-of-file address"))?;
        let root_addr = cur.addr(offset_size)?.ok_or(undefined("root object address"))?;
        let end = cur.pos() + 4;
        verify_trailing(data.get(..end).ok_or(FormatError::UnexpectedEof {
            expected: end,
            available: data.len(),
        })?)?;
        Ok(Superblock {
            offset_size,
            length_size,
            consistency_flags,
            base_addr,
            extension_addr,
            eof_addr,
            root_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_size_and_roundtrip() {
        let sb = Superblock::new(48, 4096);
        let bytes = sb.encode();
        assert_eq!(bytes.len(), SUPERBLOCK_V2_SIZE);
        assert_eq!(Superblock::decode(&bytes).unwrap(), sb);
    }

    #[test]
    fn checksum_guards_fields() {
        let mut bytes = Superblock::new(48, 4096).encode();
        bytes[30] ^= 0xFF;
        assert!(matches!(
            Superblock::decode(&bytes),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn rejects_foreign_files() {
        assert_eq!(
            Superblock::decode(&[0u8; 48]),
            Err(FormatError::InvalidSignature("superblock"))
        );
    }
}
