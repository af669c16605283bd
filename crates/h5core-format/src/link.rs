//! Link message codec (message type 0x0006), hard links only.

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::codec::{put_addr, Cursor};
use crate::error::FormatError;

const FLAG_CHARSET_PRESENT: u8 = 0x10;
const FLAG_LINK_TYPE_PRESENT: u8 = 0x08;
const FLAG_CREATION_ORDER_PRESENT: u8 = 0x04;

/// A name bound to an object header address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardLink {
    pub name: String,
    pub addr: u64,
}

impl HardLink {
    pub fn encode(&self, offset_size: u8) -> Vec<u8> {
        let name = self.name.as_bytes();
        let width_code: u8 = match name.len() {
            0..=0xFF => 0,
            0x100..=0xFFFF => 1,
            _ => 2,
        };
        let mut buf = Vec::with_capacity(4 + name.len() + offset_size as usize);
        buf.push(1);
        buf.push(width_code | FLAG_CHARSET_PRESENT);
        // UTF-8
        buf.push(1);
        let len_bytes = (name.len() as u64).to_le_bytes();
        buf.extend_from_slice(&len_bytes[..1 << width_code]);
        buf.extend_from_slice(name);
        put_addr(&mut buf, Some(self.addr), offset_size);
        buf
    }

    pub fn decode(data: &[u8], offset_size: u8) -> Result<HardLink, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                what: "link message",
                version,
            });
        }
        let flags = cur.u8()?;
        if flags & FLAG_LINK_TYPE_PRESENT != 0 {
            let link_type = cur.u8()?;
            if link_type != 0 {
                return Err(FormatError::UnsupportedVersion {
                    what: "link type",
                    version: link_type,
                });
            }
        }
        if flags & FLAG_CREATION_ORDER_PRESENT != 0 {
            cur.skip(8)?;
        }
        if flags & FLAG_CHARSET_PRESENT != 0 {
            cur.skip(1)?;
        }
        let name_len = cur.uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(cur.bytes(name_len)?).into_owned();
        let addr = cur.addr(offset_size)?.ok_or(FormatError::InvalidField {
            what: "hard link address",
            value: u64::MAX,
        })?;
        Ok(HardLink { name, addr })
    }
}
