//! Filter pipeline message codec (message type 0x000B).

#[cfg(not(feature = "std"))]
use alloc::{string::String, vec::Vec};

use crate::codec::Cursor;
use crate::error::FormatError;

/// Registered filter ids.
pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
/// First id outside the reserved range; named filters start here.
pub const FILTER_RESERVED_MAX: u16 = 255;

/// Filter flag bit 0: failures may be skipped.
pub const FILTER_FLAG_OPTIONAL: u16 = 0x0001;

/// Highest number of filters a pipeline may hold.
pub const MAX_FILTERS: usize = 32;

/// One stage of a pipeline as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub id: u16,
    pub name: Option<String>,
    pub flags: u16,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    pub fn is_optional(&self) -> bool {
        self.flags & FILTER_FLAG_OPTIONAL != 0
    }
}

/// An ordered pipeline; index `i` owns bit `i` of a chunk's filter mask.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterPipelineMessage {
    pub filters: Vec<FilterDescription>,
}

impl FilterPipelineMessage {
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        let nfilters = cur.u8()? as usize;
        if nfilters > MAX_FILTERS {
            return Err(FormatError::InvalidField {
                what: "filter count",
                value: nfilters as u64,
            });
        }
        match version {
            1 => cur.skip(6)?,
            2 => {}
            v => {
                return Err(FormatError::UnsupportedVersion {
                    what: "filter pipeline message",
                    version: v,
                })
            }
        }

        let mut filters = Vec::with_capacity(nfilters);
        for _ in 0..nfilters {
            let id = cur.u16()?;
            let name_len = if version == 1 || id > FILTER_RESERVED_MAX {
                cur.u16()? as usize
            } else {
                0
            };
            let flags = cur.u16()?;
            let ncd = cur.u16()? as usize;
            let name = if name_len > 0 {
                let raw = cur.bytes(name_len)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Some(String::from_utf8_lossy(&raw[..end]).into_owned())
            } else {
                None
            };
            let mut client_data = Vec::with_capacity(ncd);
            for _ in 0..ncd {
                client_data.push(cur.u32()?);
            }
            if version == 1 && ncd % 2 == 1 {
                cur.skip(4)?;
            }
            filters.push(FilterDescription {
                id,
                name,
                flags,
                client_data,
            });
        }
        Ok(FilterPipelineMessage { filters })
    }

    /// Encode as version 1 (names padded to eight bytes, client data to an
    /// even count) or version 2 (names only for ids above 255, no padding).
    pub fn encode(&self, version: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.filters.len() * 16);
        let version = version.clamp(1, 2);
        buf.push(version);
        buf.push(self.filters.len() as u8);
        if version == 1 {
            buf.extend_from_slice(&[0u8; 6]);
        }
        for f in &self.filters {
            buf.extend_from_slice(&f.id.to_le_bytes());
            let write_name = version == 1 || f.id > FILTER_RESERVED_MAX;
            let mut name_bytes = Vec::new();
            if write_name {
                if let Some(name) = &f.name {
                    name_bytes.extend_from_slice(name.as_bytes());
                    name_bytes.push(0);
                    if version == 1 {
                        name_bytes.resize(name_bytes.len().div_ceil(8) * 8, 0);
                    }
                }
                buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
            }
            buf.extend_from_slice(&f.flags.to_le_bytes());
            buf.extend_from_slice(&(f.client_data.len() as u16).to_le_bytes());
            buf.extend_from_slice(&name_bytes);
            for v in &f.client_data {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            if version == 1 && f.client_data.len() % 2 == 1 {
                buf.extend_from_slice(&[0u8; 4]);
            }
        }
        buf
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Mask with one bit set per stage.
    pub fn all_filters_mask(&self) -> u32 {
        match self.filters.len() {
            0 => 0,
            n if n >= 32 => u32::MAX,
            n => (1u32 << n) - 1,
        }
    }
}
