//! Serialized virtual dataset mapping list, stored as one global heap object.
//!
//! Layout: version (0), entry count (length-sized), then per entry the source
//! file name, source dataset name, source selection and virtual selection,
//! followed by a lookup3 checksum over everything before it.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::checksum::{lookup3, verify_trailing};
use crate::codec::{put_uint, Cursor};
use crate::error::FormatError;
use crate::selection::Selection;

/// Source file name meaning "the file holding the virtual dataset".
pub const SAME_FILE: &str = ".";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VdsMapping {
    pub source_file: String,
    pub source_dataset: String,
    pub source_selection: Selection,
    pub virtual_selection: Selection,
}

pub fn encode_mappings(mappings: &[VdsMapping], length_size: u8) -> Result<Vec<u8>, FormatError> {
    let mut buf = Vec::new();
    buf.push(0);
    put_uint(&mut buf, mappings.len() as u64, length_size as usize);
    for m in mappings {
        buf.extend_from_slice(m.source_file.as_bytes());
        buf.push(0);
        buf.extend_from_slice(m.source_dataset.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&m.source_selection.encode()?);
        buf.extend_from_slice(&m.virtual_selection.encode()?);
    }
    let sum = lookup3(&buf);
    buf.extend_from_slice(&sum.to_le_bytes());
    Ok(buf)
}

pub fn decode_mappings(data: &[u8], length_size: u8) -> Result<Vec<VdsMapping>, FormatError> {
    verify_trailing(data)?;
    let body = &data[..data.len() - 4];
    let mut cur = Cursor::new(body);
    let version = cur.u8()?;
    if version != 0 {
        return Err(FormatError::UnsupportedVersion {
            what: "virtual dataset mapping list",
            version,
        });
    }
    let count = cur.length(length_size)?;
    let mut out = Vec::new();
    for _ in 0..count {
        let source_file = cur.cstr()?;
        let source_dataset = cur.cstr()?;
        let (source_selection, used) = Selection::decode(&body[cur.pos()..])?;
        cur.skip(used)?;
        let (virtual_selection, used) = Selection::decode(&body[cur.pos()..])?;
        cur.skip(used)?;
        out.push(VdsMapping {
            source_file,
            source_dataset,
            source_selection,
            virtual_selection,
        });
    }
    Ok(out)
}
