//! Global heap collection ("GCOL"): numbered variable-size objects.
//!
//! Virtual dataset mappings are stored as a single object in a collection
//! of their own.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::codec::{put_uint, Cursor};
use crate::error::FormatError;

pub const GCOL_SIGNATURE: &[u8; 4] = b"GCOL";

/// Header bytes to read before the collection size is known.
pub fn header_size(length_size: u8) -> usize {
    8 + length_size as usize
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    /// `(index, data)`; index 0 is reserved for free space.
    pub objects: Vec<(u16, Vec<u8>)>,
}

impl GlobalHeapCollection {
    /// Add an object and return its index.
    pub fn insert(&mut self, data: Vec<u8>) -> u16 {
        let index = self.objects.iter().map(|(i, _)| *i).max().unwrap_or(0) + 1;
        self.objects.push((index, data));
        index
    }

    pub fn get(&self, index: u16) -> Option<&[u8]> {
        self.objects
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, d)| d.as_slice())
    }

    /// Encoded size of the whole collection.
    pub fn encoded_size(&self, length_size: u8) -> usize {
        header_size(length_size)
            + self
                .objects
                .iter()
                .map(|(_, d)| 8 + length_size as usize + d.len().div_ceil(8) * 8)
                .sum::<usize>()
    }

    pub fn encode(&self, length_size: u8) -> Vec<u8> {
        let total = self.encoded_size(length_size);
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(GCOL_SIGNATURE);
        buf.push(1);
        buf.extend_from_slice(&[0u8; 3]);
        put_uint(&mut buf, total as u64, length_size as usize);
        for (index, data) in &self.objects {
            buf.extend_from_slice(&index.to_le_bytes());
            buf.extend_from_slice(&1u16.to_le_bytes());
            buf.extend_from_slice(&[0u8; 4]);
            put_uint(&mut buf, data.len() as u64, length_size as usize);
            buf.extend_from_slice(data);
            buf.resize(buf.len().div_ceil(8) * 8, 0);
        }
        buf
    }

    /// Read the collection size from its header.
    pub fn peek_size(data: &[u8], length_size: u8) -> Result<u64, FormatError> {
        let mut cur = Cursor::new(data);
        if cur.bytes(4)? != GCOL_SIGNATURE {
            return Err(FormatError::InvalidSignature("GCOL"));
        }
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "global heap collection",
                version,
            });
        }
        cur.skip(3)?;
        cur.length(length_size)
    }

    pub fn decode(data: &[u8], length_size: u8) -> Result<Self, FormatError> {
        let size = Self::peek_size(data, length_size)? as usize;
        let data = data.get(..size).ok_or(FormatError::UnexpectedEof {
            expected: size,
            available: data.len(),
        })?;
        let mut cur = Cursor::at(data, header_size(length_size));
        let mut objects = Vec::new();
        while cur.remaining() >= 8 + length_size as usize {
            let index = cur.u16()?;
            cur.skip(6)?;
            let len = cur.length(length_size)? as usize;
            if index == 0 {
                // Free space runs to the end of the collection.
                break;
            }
            objects.push((index, cur.bytes(len)?.to_vec()));
            let pad = len.div_ceil(8) * 8 - len;
            cur.skip(pad.min(cur.remaining()))?;
        }
        Ok(GlobalHeapCollection { objects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn objects_are_numbered_from_one() {
        let mut heap = GlobalHeapCollection::default();
        assert_eq!(heap.insert(b"first".to_vec()), 1);
        assert_eq!(heap.insert(vec![9; 17]), 2);
        let bytes = heap.encode(8);
        assert_eq!(bytes.len(), heap.encoded_size(8));
        assert_eq!(GlobalHeapCollection::peek_size(&bytes, 8).unwrap(), bytes.len() as u64);
        let back = GlobalHeapCollection::decode(&bytes, 8).unwrap();
        assert_eq!(back.get(1), Some(&b"first"[..]));
        assert_eq!(back.get(2).map(<[u8]>::len), Some(17));
        assert_eq!(back.get(3), None);
    }

    #[test]
    fn free_space_object_ends_the_scan() {
        let mut heap = GlobalHeapCollection::default();
        heap.insert(vec![1; 8]);
        let mut bytes = heap.encode(8);
        // Append a free-space object and grow the stored size to cover it.
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&64u64.to_le_bytes());
        bytes.resize(bytes.len() + 48, 0);
        let total = bytes.len() as u64;
        bytes[8..16].copy_from_slice(&total.to_le_bytes());
        let back = GlobalHeapCollection::decode(&bytes, 8).unwrap();
        assert_eq!(back.objects.len(), 1);
    }
}
