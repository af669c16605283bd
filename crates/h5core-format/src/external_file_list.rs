//! External data files message codec (message type 0x0007).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::codec::{put_addr, put_uint, Cursor};
use crate::error::FormatError;

/// Segment size meaning "to the end of the file, without bound".
pub const EFL_UNLIMITED: u64 = u64::MAX;

/// One external segment; `name_offset` indexes the local heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EflSlot {
    pub name_offset: u64,
    pub file_offset: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFileListMessage {
    pub heap_addr: Option<u64>,
    pub slots: Vec<EflSlot>,
}

impl ExternalFileListMessage {
    pub fn decode(data: &[u8], offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "external file list",
                version,
            });
        }
        cur.skip(3)?;
        let allocated = cur.u16()?;
        let used = cur.u16()?;
        if used > allocated {
            return Err(FormatError::InvalidField {
                what: "external file list used slots",
                value: used as u64,
            });
        }
        let heap_addr = cur.addr(offset_size)?;
        let mut slots = Vec::with_capacity(used as usize);
        for _ in 0..used {
            slots.push(EflSlot {
                name_offset: cur.length(length_size)?,
                file_offset: cur.length(length_size)?,
                size: cur.length(length_size)?,
            });
        }
        Ok(ExternalFileListMessage { heap_addr, slots })
    }

    pub fn encode(&self, offset_size: u8, length_size: u8) -> Vec<u8> {
        let n = self.slots.len() as u16;
        let mut buf = Vec::with_capacity(8 + offset_size as usize + self.slots.len() * 24);
        buf.push(1);
        buf.extend_from_slice(&[0u8; 3]);
        buf.extend_from_slice(&n.to_le_bytes());
        buf.extend_from_slice(&n.to_le_bytes());
        put_addr(&mut buf, self.heap_addr, offset_size);
        for s in &self.slots {
            put_uint(&mut buf, s.name_offset, length_size as usize);
            put_uint(&mut buf, s.file_offset, length_size as usize);
            put_uint(&mut buf, s.size, length_size as usize);
        }
        buf
    }
}
