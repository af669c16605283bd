//! Fill value messages: the current form (0x0005, versions 1 to 3) and the
//! legacy form (0x0004).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::codec::Cursor;
use crate::error::FormatError;

/// When storage is reserved for raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocTime {
    Early,
    Late,
    Incremental,
}

/// When the fill value is written into newly reserved storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillTime {
    OnAlloc,
    Never,
    #[default]
    IfSet,
}

/// Whether a fill value exists and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FillStatus {
    /// No fill value; unwritten data is unspecified.
    Undefined,
    /// The library default: all zero bytes.
    Default,
    /// An explicit value supplied at creation.
    UserDefined,
}

/// Decoded fill value message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValueMessage {
    pub alloc_time: AllocTime,
    pub fill_time: FillTime,
    pub status: FillStatus,
    /// Present iff `status == UserDefined`.
    pub value: Option<Vec<u8>>,
}

impl FillValueMessage {
    pub fn decode(data: &[u8]) -> Result<FillValueMessage, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        match version {
            1 | 2 => {
                let alloc_time = decode_alloc(cur.u8()?)?;
                let fill_time = decode_fill_time(cur.u8()?)?;
                let defined = cur.u8()? != 0;
                // Version 1 always carries the size field.
                if !defined && version == 2 {
                    return Ok(FillValueMessage {
                        alloc_time,
                        fill_time,
                        status: FillStatus::Undefined,
                        value: None,
                    });
                }
                let size = cur.u32()? as usize;
                let (status, value) = if !defined {
                    cur.skip(size)?;
                    (FillStatus::Undefined, None)
                } else if size == 0 {
                    (FillStatus::Default, None)
                } else {
                    (FillStatus::UserDefined, Some(cur.bytes(size)?.to_vec()))
                };
                Ok(FillValueMessage {
                    alloc_time,
                    fill_time,
                    status,
                    value,
                })
            }
            3 => {
                let flags = cur.u8()?;
                let alloc_time = decode_alloc(flags & 0x03)?;
                let fill_time = decode_fill_time((flags >> 2) & 0x03)?;
                let undefined = flags & 0x10 != 0;
                let has_value = flags & 0x20 != 0;
                if undefined && has_value {
                    return Err(FormatError::InvalidField {
                        what: "fill value flags",
                        value: flags as u64,
                    });
                }
                let (status, value) = if undefined {
                    (FillStatus::Undefined, None)
                } else if has_value {
                    let size = cur.u32()? as usize;
                    (FillStatus::UserDefined, Some(cur.bytes(size)?.to_vec()))
                } else {
                    (FillStatus::Default, None)
                };
                Ok(FillValueMessage {
                    alloc_time,
                    fill_time,
                    status,
                    value,
                })
            }
            v => Err(FormatError::UnsupportedVersion {
                what: "fill value message",
                version: v,
            }),
        }
    }

    /// Encode as version 2 or 3.
    pub fn encode(&self, version: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.value.as_ref().map_or(0, Vec::len));
        if version >= 3 {
            let mut flags = encode_alloc(self.alloc_time) | (encode_fill_time(self.fill_time) << 2);
            match self.status {
                FillStatus::Undefined => flags |= 0x10,
                FillStatus::UserDefined if self.value.is_some() => flags |= 0x20,
                _ => {}
            }
            buf.push(3);
            buf.push(flags);
            if let (FillStatus::UserDefined, Some(v)) = (self.status, &self.value) {
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v);
            }
        } else {
            buf.push(2);
            buf.push(encode_alloc(self.alloc_time));
            buf.push(encode_fill_time(self.fill_time));
            buf.push(u8::from(self.status != FillStatus::Undefined));
            if self.status != FillStatus::Undefined {
                let v = self.value.as_deref().unwrap_or(&[]);
                buf.extend_from_slice(&(v.len() as u32).to_le_bytes());
                buf.extend_from_slice(v);
            }
        }
        buf
    }
}

/// Decode the legacy fill value message (size + raw value).
pub fn decode_old(data: &[u8]) -> Result<Option<Vec<u8>>, FormatError> {
    let mut cur = Cursor::new(data);
    let size = cur.u32()? as usize;
    if size == 0 {
        return Ok(None);
    }
    Ok(Some(cur.bytes(size)?.to_vec()))
}

/// Encode the legacy fill value message.
pub fn encode_old(value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + value.len());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode_alloc(v: u8) -> Result<AllocTime, FormatError> {
    match v {
        1 => Ok(AllocTime::Early),
        2 => Ok(AllocTime::Late),
        3 => Ok(AllocTime::Incremental),
        _ => Err(FormatError::InvalidField {
            what: "space allocation time",
            value: v as u64,
        }),
    }
}

fn encode_alloc(a: AllocTime) -> u8 {
    match a {
        AllocTime::Early => 1,
        AllocTime::Late => 2,
        AllocTime::Incremental => 3,
    }
}

fn decode_fill_time(v: u8) -> Result<FillTime, FormatError> {
    match v {
        0 => Ok(FillTime::OnAlloc),
        1 => Ok(FillTime::Never),
        2 => Ok(FillTime::IfSet),
        _ => Err(FormatError::InvalidField {
            what: "fill write time",
            value: v as u64,
        }),
    }
}

fn encode_fill_time(t: FillTime) -> u8 {
    match t {
        FillTime::OnAlloc => 0,
        FillTime::Never => 1,
        FillTime::IfSet => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(v: &[u8]) -> FillValueMessage {
        FillValueMessage {
            alloc_time: AllocTime::Incremental,
            fill_time: FillTime::IfSet,
            status: FillStatus::UserDefined,
            value: Some(v.to_vec()),
        }
    }

    #[test]
    fn v3_flags_layout() {
        let msg = user(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let bytes = msg.encode(3);
        // alloc 3 | fill-time 2 << 2 | has-value
        assert_eq!(bytes[..2], [3, 0x03 | 0x08 | 0x20]);
        assert_eq!(bytes.len(), 2 + 4 + 4);
        assert_eq!(FillValueMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn v2_statuses_survive() {
        for status in [
            FillStatus::Undefined,
            FillStatus::Default,
            FillStatus::UserDefined,
        ] {
            let msg = FillValueMessage {
                alloc_time: AllocTime::Late,
                fill_time: FillTime::OnAlloc,
                status,
                value: (status == FillStatus::UserDefined).then(|| vec![1, 2]),
            };
            assert_eq!(FillValueMessage::decode(&msg.encode(2)).unwrap(), msg);
        }
    }

    #[test]
    fn v1_always_has_size() {
        let bytes = [1u8, 1, 0, 0, 0, 0, 0, 0];
        let msg = FillValueMessage::decode(&bytes).unwrap();
        assert_eq!(msg.status, FillStatus::Undefined);
        assert_eq!(msg.alloc_time, AllocTime::Early);
    }

    #[test]
    fn legacy_form() {
        let bytes = encode_old(&[7, 0, 0, 0]);
        assert_eq!(decode_old(&bytes).unwrap(), Some(vec![7, 0, 0, 0]));
        assert_eq!(decode_old(&[0, 0, 0, 0]).unwrap(), None);
    }

    #[test]
    fn conflicting_v3_flags_rejected() {
        assert!(FillValueMessage::decode(&[3, 0x30]).is_err());
    }
}
