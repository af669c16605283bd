//! Local heap ("HEAP"): a small string table referenced by offset.
//!
//! The dataset engine only uses it to hold external file names.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec, vec::Vec};

use crate::codec::{put_addr, put_uint, Cursor, UNDEFINED_ADDR};
use crate::error::FormatError;

pub const LOCAL_HEAP_SIGNATURE: &[u8; 4] = b"HEAP";

/// Header of a local heap: where its data segment lives and how large it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeapHeader {
    pub data_size: u64,
    pub data_addr: u64,
}

impl LocalHeapHeader {
    pub fn encoded_size(offset_size: u8, length_size: u8) -> usize {
        8 + 2 * length_size as usize + offset_size as usize
    }

    pub fn encode(&self, offset_size: u8, length_size: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::encoded_size(offset_size, length_size));
        buf.extend_from_slice(LOCAL_HEAP_SIGNATURE);
        buf.push(0);
        buf.extend_from_slice(&[0u8; 3]);
        put_uint(&mut buf, self.data_size, length_size as usize);
        // No free list: every byte of the segment is in use.
        put_uint(&mut buf, UNDEFINED_ADDR, length_size as usize);
        put_addr(&mut buf, Some(self.data_addr), offset_size);
        buf
    }

    pub fn decode(data: &[u8], offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(data);
        if cur.bytes(4)? != LOCAL_HEAP_SIGNATURE {
            return Err(FormatError::InvalidSignature("HEAP"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "local heap",
                version,
            });
        }
        cur.skip(3)?;
        let data_size = cur.length(length_size)?;
        let _free_list = cur.length(length_size)?;
        let data_addr = cur.addr(offset_size)?.ok_or(FormatError::InvalidField {
            what: "local heap data address",
            value: UNDEFINED_ADDR,
        })?;
        Ok(LocalHeapHeader {
            data_size,
            data_addr,
        })
    }
}

/// The data segment of a local heap, built or read as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHeapData {
    bytes: Vec<u8>,
}

impl Default for LocalHeapData {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHeapData {
    /// A heap whose offset 0 holds the empty string.
    pub fn new() -> Self {
        LocalHeapData {
            bytes: vec![0u8; 8],
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        LocalHeapData { bytes }
    }

    /// Append a string, returning its offset. Entries are padded to eight bytes.
    pub fn insert(&mut self, s: &str) -> u64 {
        let offset = self.bytes.len() as u64;
        self.bytes.extend_from_slice(s.as_bytes());
        self.bytes.push(0);
        let padded = self.bytes.len().div_ceil(8) * 8;
        self.bytes.resize(padded, 0);
        offset
    }

    pub fn get(&self, offset: u64) -> Result<String, FormatError> {
        let start = usize::try_from(offset).map_err(|_| FormatError::InvalidField {
            what: "local heap offset",
            value: offset,
        })?;
        if start >= self.bytes.len() {
            return Err(FormatError::InvalidField {
                what: "local heap offset",
                value: offset,
            });
        }
        Cursor::at(&self.bytes, start).cstr()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
