//! Fixed array chunk index: a "FAHD" header followed by one unpaged "FADB"
//! data block holding a record per chunk in row-major chunk order.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::checksum::{lookup3, verify_trailing};
use crate::codec::{put_addr, put_uint, Cursor};
use crate::error::FormatError;

pub const FAHD_SIGNATURE: &[u8; 4] = b"FAHD";
pub const FADB_SIGNATURE: &[u8; 4] = b"FADB";

/// Smallest page-bits value written; at least 1024 records before paging.
pub const MIN_PAGE_BITS: u8 = 10;

/// One chunk record. `addr == None` means the chunk is not allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedArrayEntry {
    pub addr: Option<u64>,
    pub size: u64,
    pub filter_mask: u32,
}

/// Decoded header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedArrayHeader {
    pub filtered: bool,
    pub element_size: u8,
    pub page_bits: u8,
    pub nelmts: u64,
    pub data_block_addr: Option<u64>,
}

/// Width of the stored chunk-size field for filtered records.
pub fn filtered_size_width(raw_chunk_bytes: u64) -> usize {
    let log2 = if raw_chunk_bytes <= 1 {
        0
    } else {
        63 - raw_chunk_bytes.leading_zeros() as usize
    };
    (1 + (log2 + 8) / 8).min(8)
}

/// Page bits for `n` records: never below [`MIN_PAGE_BITS`] and always large
/// enough that the data block is unpaged.
pub fn page_bits_for(n: u64) -> u8 {
    let ceil_log2 = if n <= 1 {
        0
    } else {
        64 - (n - 1).leading_zeros() as u8
    };
    ceil_log2.max(MIN_PAGE_BITS)
}

fn element_size(filtered: bool, raw_chunk_bytes: u64, offset_size: u8) -> usize {
    if filtered {
        offset_size as usize + filtered_size_width(raw_chunk_bytes) + 4
    } else {
        offset_size as usize
    }
}

fn header_size(offset_size: u8, length_size: u8) -> usize {
    4 + 4 + length_size as usize + offset_size as usize + 4
}

/// Total bytes of header plus data block for `n` records.
pub fn fixed_array_size(
    n: usize,
    filtered: bool,
    raw_chunk_bytes: u64,
    offset_size: u8,
    length_size: u8,
) -> usize {
    header_size(offset_size, length_size)
        + 6
        + offset_size as usize
        + n * element_size(filtered, raw_chunk_bytes, offset_size)
        + 4
}

/// Encode header and data block at `base`. Returns the bytes and the page bits
/// to record in the layout message.
pub fn build_fixed_array(
    entries: &[FixedArrayEntry],
    filtered: bool,
    raw_chunk_bytes: u64,
    base: u64,
    offset_size: u8,
    length_size: u8,
) -> (Vec<u8>, u8) {
    let client: u8 = u8::from(filtered);
    let esize = element_size(filtered, raw_chunk_bytes, offset_size);
    let page_bits = page_bits_for(entries.len() as u64);
    let hsize = header_size(offset_size, length_size);

    let mut buf = Vec::with_capacity(fixed_array_size(
        entries.len(),
        filtered,
        raw_chunk_bytes,
        offset_size,
        length_size,
    ));
    buf.extend_from_slice(FAHD_SIGNATURE);
    buf.push(0);
    buf.push(client);
    buf.push(esize as u8);
    buf.push(page_bits);
    put_uint(&mut buf, entries.len() as u64, length_size as usize);
    put_addr(&mut buf, Some(base + hsize as u64), offset_size);
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());

    let block_start = buf.len();
    buf.extend_from_slice(FADB_SIGNATURE);
    buf.push(0);
    buf.push(client);
    put_addr(&mut buf, Some(base), offset_size);
    let width = filtered_size_width(raw_chunk_bytes);
    for e in entries {
        put_addr(&mut buf, e.addr, offset_size);
        if filtered {
            put_uint(&mut buf, e.size, width);
            buf.extend_from_slice(&e.filter_mask.to_le_bytes());
        }
    }
    let sum = lookup3(&buf[block_start..]);
    buf.extend_from_slice(&sum.to_le_bytes());
    (buf, page_bits)
}

impl FixedArrayHeader {
    /// Bytes to read at the header address.
    pub fn encoded_size(offset_size: u8, length_size: u8) -> usize {
        header_size(offset_size, length_size)
    }

    pub fn decode(data: &[u8], offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        let hsize = header_size(offset_size, length_size);
        verify_trailing(data.get(..hsize).ok_or(FormatError::UnexpectedEof {
            expected: hsize,
            available: data.len(),
        })?)?;
        let mut cur = Cursor::new(data);
        if cur.bytes(4)? != FAHD_SIGNATURE {
            return Err(FormatError::InvalidSignature("FAHD"));
        }
        let version = cur.u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                what: "fixed array header",
                version,
            });
        }
        let client = cur.u8()?;
        if client > 1 {
            return Err(FormatError::InvalidField {
                what: "fixed array client id",
                value: client as u64,
            });
        }
        let element_size = cur.u8()?;
        let page_bits = cur.u8()?;
        let nelmts = cur.length(length_size)?;
        let data_block_addr = cur.addr(offset_size)?;
        Ok(FixedArrayHeader {
            filtered: client == 1,
            element_size,
            page_bits,
            nelmts,
            data_block_addr,
        })
    }

    /// Size of the (unpaged) data block this header describes.
    pub fn data_block_size(&self, offset_size: u8) -> Result<usize, FormatError> {
        if self.nelmts > 1u64.checked_shl(self.page_bits as u32).unwrap_or(u64::MAX) {
            return Err(FormatError::UnsupportedVersion {
                what: "paged fixed array data block",
                version: self.page_bits,
            });
        }
        Ok(6 + offset_size as usize + self.nelmts as usize * self.element_size as usize + 4)
    }

    pub fn decode_data_block(
        &self,
        data: &[u8],
        offset_size: u8,
    ) -> Result<Vec<FixedArrayEntry>, FormatError> {
        let size = self.data_block_size(offset_size)?;
        let block = data.get(..size).ok_or(FormatError::UnexpectedEof {
            expected: size,
            available: data.len(),
        })?;
        verify_trailing(block)?;
        let mut cur = Cursor::new(block);
        if cur.bytes(4)? != FADB_SIGNATURE {
            return Err(FormatError::InvalidSignature("FADB"));
        }
        cur.skip(2 + offset_size as usize)?;
        let width = (self.element_size as usize).saturating_sub(offset_size as usize);
        let size_width = width.saturating_sub(4);
        let mut out = Vec::with_capacity(self.nelmts as usize);
        for _ in 0..self.nelmts {
            let addr = cur.addr(offset_size)?;
            let (size, filter_mask) = if self.filtered {
                (cur.uint(size_width)?, cur.u32()?)
            } else {
                (0, 0)
            };
            out.push(FixedArrayEntry {
                addr,
                size,
                filter_mask,
            });
        }
        Ok(out)
    }
}
