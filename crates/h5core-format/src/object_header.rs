//! Object header encoding and decoding, versions 1 and 2.
//!
//! A header is a list of messages spread over chunk 0 and any number of
//! continuation chunks. Chunk 0 has a fixed capacity chosen when the header
//! is first written; rewrites must fit in it, spilling the tail of the
//! message list into a single continuation chunk when they do not.
//!
//! Reading is split in steps so the caller owns all I/O:
//! [`HeaderPrefix::decode`] on the first [`PREFIX_LEN`] bytes, then
//! [`decode_chunk`] on chunk 0 and on every continuation it names.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::{lookup3, verify_trailing};
use crate::codec::{put_addr, put_uint, Cursor};
use crate::error::FormatError;
use crate::message_type::{MessageType, MSG_FLAG_FAIL_IF_UNKNOWN};

pub const OHDR_SIGNATURE: &[u8; 4] = b"OHDR";
pub const OCHK_SIGNATURE: &[u8; 4] = b"OCHK";

/// Bytes to read at a header address before its size is known.
pub const PREFIX_LEN: usize = 16;

/// Extra room left in chunk 0 of a normal (non-minimized) header.
pub const HEADER_SLACK: usize = 256;

const V2_FLAG_CREATION_ORDER: u8 = 0x04;
const V2_FLAG_ATTR_PHASE: u8 = 0x10;
const V2_FLAG_TIMES: u8 = 0x20;

/// One message as stored in a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl RawMessage {
    pub fn new(msg_type: MessageType, data: Vec<u8>) -> Self {
        RawMessage {
            msg_type,
            flags: 0,
            data,
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }
}

/// Fixed-size start of a header, decoded from the first [`PREFIX_LEN`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPrefix {
    pub version: u8,
    pub flags: u8,
    /// Bytes before the first message.
    pub prefix_len: usize,
    /// Capacity of chunk 0's message area.
    pub chunk0_len: usize,
}

impl HeaderPrefix {
    pub fn decode(data: &[u8]) -> Result<HeaderPrefix, FormatError> {
        let mut cur = Cursor::new(data);
        if data.len() >= 4 && &data[..4] == OHDR_SIGNATURE {
            cur.skip(4)?;
            let version = cur.u8()?;
            if version != 2 {
                return Err(FormatError::UnsupportedVersion {
                    what: "object header",
                    version,
                });
            }
            let flags = cur.u8()?;
            if flags & V2_FLAG_TIMES != 0 {
                cur.skip(16)?;
            }
            if flags & V2_FLAG_ATTR_PHASE != 0 {
                cur.skip(4)?;
            }
            let width = 1usize << (flags & 0x03);
            let chunk0_len = cur.uint(width)? as usize;
            Ok(HeaderPrefix {
                version: 2,
                flags,
                prefix_len: cur.pos(),
                chunk0_len,
            })
        } else {
            let version = cur.u8()?;
            if version != 1 {
                return Err(FormatError::UnsupportedVersion {
                    what: "object header",
                    version,
                });
            }
            cur.skip(1 + 2 + 4)?;
            let chunk0_len = cur.u32()? as usize;
            Ok(HeaderPrefix {
                version: 1,
                flags: 0,
                prefix_len: 16,
                chunk0_len,
            })
        }
    }

    /// Total on-disk size of chunk 0 including prefix and checksum.
    pub fn chunk0_total(&self) -> usize {
        self.prefix_len + self.chunk0_len + if self.version == 2 { 4 } else { 0 }
    }
}

/// Messages and continuation pointers found in one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkContents {
    pub messages: Vec<RawMessage>,
    /// `(address, length)` of each continuation chunk named here.
    pub continuations: Vec<(u64, u64)>,
}

/// Decode one chunk. `first` selects chunk 0 (which starts with the prefix)
/// versus a continuation chunk.
pub fn decode_chunk(
    prefix: &HeaderPrefix,
    data: &[u8],
    first: bool,
    offset_size: u8,
    length_size: u8,
) -> Result<ChunkContents, FormatError> {
    let body = if prefix.version == 2 {
        verify_trailing(data)?;
        let body = &data[..data.len() - 4];
        if first {
            body.get(prefix.prefix_len..).ok_or(FormatError::UnexpectedEof {
                expected: prefix.prefix_len,
                available: body.len(),
            })?
        } else {
            if body.len() < 4 || &body[..4] != OCHK_SIGNATURE {
                return Err(FormatError::InvalidSignature("OCHK"));
            }
            &body[4..]
        }
    } else if first {
        data.get(16..).ok_or(FormatError::UnexpectedEof {
            expected: 16,
            available: data.len(),
        })?
    } else {
        data
    };

    let hdr_len = match prefix.version {
        1 => 8,
        _ if prefix.flags & V2_FLAG_CREATION_ORDER != 0 => 6,
        _ => 4,
    };
    let mut out = ChunkContents::default();
    let mut cur = Cursor::new(body);
    while cur.remaining() >= hdr_len {
        let (raw_type, size, flags) = if prefix.version == 1 {
            let t = cur.u16()?;
            let s = cur.u16()? as usize;
            let f = cur.u8()?;
            cur.skip(3)?;
            (t, s, f)
        } else {
            let t = cur.u8()? as u16;
            let s = cur.u16()? as usize;
            let f = cur.u8()?;
            if hdr_len == 6 {
                cur.skip(2)?;
            }
            (t, s, f)
        };
        let data = cur.bytes(size)?;
        let msg_type = MessageType::from_u16(raw_type);
        match msg_type {
            MessageType::Nil => {}
            MessageType::Continuation => {
                let mut c = Cursor::new(data);
                let addr = c.addr(offset_size)?.ok_or(FormatError::InvalidField {
                    what: "continuation address",
                    value: u64::MAX,
                })?;
                let len = c.length(length_size)?;
                out.continuations.push((addr, len));
            }
            MessageType::Unknown(id) if flags & MSG_FLAG_FAIL_IF_UNKNOWN != 0 => {
                return Err(FormatError::UnsupportedMessage(id));
            }
            _ => out.messages.push(RawMessage {
                msg_type,
                flags,
                data: data.to_vec(),
            }),
        }
    }
    Ok(out)
}

/// Encoded size of one message including its header (and v1 padding).
pub fn message_size(version: u8, data_len: usize) -> usize {
    if version == 1 {
        8 + data_len.div_ceil(8) * 8
    } else {
        4 + data_len
    }
}

/// Size of a continuation message.
pub fn continuation_message_size(version: u8, offset_size: u8, length_size: u8) -> usize {
    message_size(version, offset_size as usize + length_size as usize)
}

/// Sum of the encoded sizes of `messages`.
pub fn messages_size(version: u8, messages: &[RawMessage]) -> usize {
    messages
        .iter()
        .map(|m| message_size(version, m.data.len()))
        .sum()
}

/// Chunk 0 capacity for a new header. A minimized header holds exactly its
/// messages plus room for one continuation message; a normal one adds slack.
pub fn initial_capacity(
    version: u8,
    messages: &[RawMessage],
    minimized: bool,
    offset_size: u8,
    length_size: u8,
) -> usize {
    let base = messages_size(version, messages)
        + continuation_message_size(version, offset_size, length_size);
    let cap = if minimized { base } else { base + HEADER_SLACK };
    if version == 1 {
        cap.div_ceil(8) * 8
    } else {
        cap
    }
}

/// How a message list is split between chunk 0 and a continuation chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderPlan {
    /// Messages `[..split]` live in chunk 0.
    pub split: usize,
    /// Total length of the continuation chunk, if one is needed.
    pub continuation_len: Option<u64>,
}

/// Encoder for a header with a fixed chunk 0 capacity.
#[derive(Debug, Clone, Copy)]
pub struct HeaderWriter {
    pub version: u8,
    pub chunk0_capacity: usize,
    pub offset_size: u8,
    pub length_size: u8,
}

impl HeaderWriter {
    /// Decide which messages fit in chunk 0.
    pub fn plan(&self, messages: &[RawMessage]) -> Result<HeaderPlan, FormatError> {
        for m in messages {
            if m.data.len() > u16::MAX as usize {
                return Err(FormatError::MessageTooLarge(m.data.len()));
            }
        }
        let sizes: Vec<usize> = messages
            .iter()
            .map(|m| message_size(self.version, m.data.len()))
            .collect();
        let total: usize = sizes.iter().sum();
        if total <= self.chunk0_capacity {
            return Ok(HeaderPlan {
                split: messages.len(),
                continuation_len: None,
            });
        }
        let cont = continuation_message_size(self.version, self.offset_size, self.length_size);
        let mut used = 0;
        let mut split = 0;
        while split < sizes.len() && used + sizes[split] + cont <= self.chunk0_capacity {
            used += sizes[split];
            split += 1;
        }
        if used + cont > self.chunk0_capacity {
            return Err(FormatError::MessageTooLarge(cont));
        }
        let rest: usize = sizes[split..].iter().sum();
        let continuation_len = if self.version == 2 { rest + 8 } else { rest };
        Ok(HeaderPlan {
            split,
            continuation_len: Some(continuation_len as u64),
        })
    }

    /// Encode chunk 0 and the continuation chunk named by `plan`.
    /// `continuation_addr` must be set whenever the plan needs one.
    pub fn encode(
        &self,
        messages: &[RawMessage],
        plan: &HeaderPlan,
        continuation_addr: Option<u64>,
    ) -> Result<(Vec<u8>, Option<Vec<u8>>), FormatError> {
        let cont = match (plan.continuation_len, continuation_addr) {
            (Some(len), Some(addr)) => Some((addr, len)),
            (None, _) => None,
            (Some(_), None) => {
                return Err(FormatError::InvalidField {
                    what: "continuation address",
                    value: u64::MAX,
                })
            }
        };
        let (head, tail) = messages.split_at(plan.split);

        let mut body = Vec::with_capacity(self.chunk0_capacity);
        for m in head {
            self.put_message(&mut body, m.msg_type.to_u16(), m.flags, &m.data);
        }
        if let Some((addr, len)) = cont {
            let mut data = Vec::with_capacity(16);
            put_addr(&mut data, Some(addr), self.offset_size);
            put_uint(&mut data, len, self.length_size as usize);
            self.put_message(&mut body, MessageType::Continuation.to_u16(), 0, &data);
        }
        if body.len() > self.chunk0_capacity {
            return Err(FormatError::MessageTooLarge(body.len()));
        }
        let mut nil_count = 0u16;
        let left = self.chunk0_capacity - body.len();
        let nil_hdr = if self.version == 1 { 8 } else { 4 };
        if left >= nil_hdr {
            let zeros = vec_zeros(left - nil_hdr);
            self.put_message(&mut body, 0, 0, &zeros);
            nil_count = 1;
        } else {
            body.resize(self.chunk0_capacity, 0);
        }

        let chunk0 = if self.version == 2 {
            let width_code = match self.chunk0_capacity {
                0..=0xFF => 0u8,
                0x100..=0xFFFF => 1,
                0x1_0000..=0xFFFF_FFFF => 2,
                _ => 3,
            };
            let mut buf = Vec::with_capacity(self.chunk0_capacity + 24);
            buf.extend_from_slice(OHDR_SIGNATURE);
            buf.push(2);
            buf.push(width_code);
            put_uint(&mut buf, self.chunk0_capacity as u64, 1 << width_code);
            buf.extend_from_slice(&body);
            let sum = lookup3(&buf);
            buf.extend_from_slice(&sum.to_le_bytes());
            buf
        } else {
            let total = messages.len() + usize::from(cont.is_some()) + nil_count as usize;
            let mut buf = Vec::with_capacity(self.chunk0_capacity + 16);
            buf.push(1);
            buf.push(0);
            buf.extend_from_slice(&(total as u16).to_le_bytes());
            buf.extend_from_slice(&1u32.to_le_bytes());
            buf.extend_from_slice(&(self.chunk0_capacity as u32).to_le_bytes());
            buf.extend_from_slice(&[0u8; 4]);
            buf.extend_from_slice(&body);
            buf
        };

        let continuation = cont.map(|_| {
            let mut buf = Vec::new();
            if self.version == 2 {
                buf.extend_from_slice(OCHK_SIGNATURE);
            }
            for m in tail {
                self.put_message(&mut buf, m.msg_type.to_u16(), m.flags, &m.data);
            }
            if self.version == 2 {
                let sum = lookup3(&buf);
                buf.extend_from_slice(&sum.to_le_bytes());
            }
            buf
        });
        Ok((chunk0, continuation))
    }

    fn put_message(&self, buf: &mut Vec<u8>, raw_type: u16, flags: u8, data: &[u8]) {
        if self.version == 1 {
            let padded = data.len().div_ceil(8) * 8;
            buf.extend_from_slice(&raw_type.to_le_bytes());
            buf.extend_from_slice(&(padded as u16).to_le_bytes());
            buf.push(flags);
            buf.extend_from_slice(&[0u8; 3]);
            buf.extend_from_slice(data);
            buf.resize(buf.len() + padded - data.len(), 0);
        } else {
            buf.push(raw_type as u8);
            buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
            buf.push(flags);
            buf.extend_from_slice(data);
        }
    }
}

fn vec_zeros(n: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(n);
    v.resize(n, 0);
    v
}

/// Read the stored chunk 0 capacity from an encoded v2 chunk 0 without a full decode.
pub fn v2_chunk0_len(data: &[u8]) -> Option<usize> {
    let flags = *data.get(5)?;
    let width = 1usize << (flags & 0x03);
    let raw = data.get(6..6 + width)?;
    Some(LittleEndian::read_uint(raw, width) as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msgs() -> Vec<RawMessage> {
        vec![
            RawMessage::new(MessageType::Dataspace, vec![2, 1, 0, 1, 10, 0, 0, 0, 0, 0, 0, 0]),
            RawMessage::new(MessageType::Datatype, vec![0x10, 8, 0, 0, 4, 0, 0, 0, 0, 0, 32, 0])
                .with_flags(0x01),
            RawMessage::new(MessageType::DataLayout, vec![3, 1, 0, 8, 0, 0, 0, 0, 0, 0, 40]),
        ]
    }

    fn read_back(version: u8, chunk0: &[u8], cont: Option<&[u8]>) -> Vec<RawMessage> {
        let prefix = HeaderPrefix::decode(&chunk0[..PREFIX_LEN]).unwrap();
        assert_eq!(prefix.version, version);
        assert_eq!(prefix.chunk0_total(), chunk0.len());
        let first = decode_chunk(&prefix, chunk0, true, 8, 8).unwrap();
        let mut all = first.messages;
        if let Some(c) = cont {
            assert_eq!(first.continuations.len(), 1);
            assert_eq!(first.continuations[0].1, c.len() as u64);
            all.extend(decode_chunk(&prefix, c, false, 8, 8).unwrap().messages);
        } else {
            assert!(first.continuations.is_empty());
        }
        all
    }

    fn padded(v1: bool, m: &[RawMessage]) -> Vec<RawMessage> {
        m.iter()
            .cloned()
            .map(|mut m| {
                if v1 {
                    m.data.resize(m.data.len().div_ceil(8) * 8, 0);
                }
                m
            })
            .collect()
    }

    #[test]
    fn v2_single_chunk_with_nil_fill() {
        let m = msgs();
        let cap = initial_capacity(2, &m, false, 8, 8);
        let w = HeaderWriter {
            version: 2,
            chunk0_capacity: cap,
            offset_size: 8,
            length_size: 8,
        };
        let plan = w.plan(&m).unwrap();
        assert_eq!(plan.continuation_len, None);
        let (c0, cont) = w.encode(&m, &plan, None).unwrap();
        assert!(cont.is_none());
        assert_eq!(&c0[..4], b"OHDR");
        assert_eq!(v2_chunk0_len(&c0), Some(cap));
        assert_eq!(read_back(2, &c0, None), m);
    }

    #[test]
    fn minimized_v2_is_exact() {
        let m = msgs();
        let cap = initial_capacity(2, &m, true, 8, 8);
        assert_eq!(cap, messages_size(2, &m) + 20);
        let w = HeaderWriter {
            version: 2,
            chunk0_capacity: cap,
            offset_size: 8,
            length_size: 8,
        };
        let (c0, _) = w.encode(&m, &w.plan(&m).unwrap(), None).unwrap();
        assert_eq!(c0.len(), 4 + 1 + 1 + 1 + cap + 4);
    }

    #[test]
    fn overflow_spills_into_continuation() {
        for version in [1u8, 2] {
            let mut m = msgs();
            let cap = initial_capacity(version, &m, true, 8, 8);
            m.push(RawMessage::new(MessageType::FillValue, vec![0xA5; 24]));
            m.push(RawMessage::new(MessageType::FilterPipeline, vec![0x5A; 24]));
            let w = HeaderWriter {
                version,
                chunk0_capacity: cap,
                offset_size: 8,
                length_size: 8,
            };
            let plan = w.plan(&m).unwrap();
            assert!(plan.split < m.len());
            let (c0, cont) = w.encode(&m, &plan, Some(0x9000)).unwrap();
            let cont = cont.unwrap();
            assert_eq!(cont.len() as u64, plan.continuation_len.unwrap());
            assert_eq!(read_back(version, &c0, Some(&cont)), padded(version == 1, &m));
        }
    }

    #[test]
    fn v1_layout_and_alignment() {
        let m = msgs();
        let cap = initial_capacity(1, &m, false, 8, 8);
        assert_eq!(cap % 8, 0);
        let w = HeaderWriter {
            version: 1,
            chunk0_capacity: cap,
            offset_size: 8,
            length_size: 8,
        };
        let (c0, _) = w.encode(&m, &w.plan(&m).unwrap(), None).unwrap();
        assert_eq!(c0[0], 1);
        // three messages plus the trailing NIL
        assert_eq!(LittleEndian::read_u16(&c0[2..4]), 4);
        assert_eq!(c0.len(), 16 + cap);
        assert_eq!(read_back(1, &c0, None), padded(true, &m));
    }

    #[test]
    fn corrupted_v2_chunk_fails_checksum() {
        let m = msgs();
        let w = HeaderWriter {
            version: 2,
            chunk0_capacity: initial_capacity(2, &m, true, 8, 8),
            offset_size: 8,
            length_size: 8,
        };
        let (mut c0, _) = w.encode(&m, &w.plan(&m).unwrap(), None).unwrap();
        c0[10] ^= 1;
        let prefix = HeaderPrefix::decode(&c0[..PREFIX_LEN]).unwrap();
        assert!(matches!(
            decode_chunk(&prefix, &c0, true, 8, 8),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn must_understand_unknown_message_rejected() {
        let m = vec![RawMessage::new(MessageType::Unknown(0x55), vec![0; 4])
            .with_flags(MSG_FLAG_FAIL_IF_UNKNOWN)];
        let w = HeaderWriter {
            version: 2,
            chunk0_capacity: 64,
            offset_size: 8,
            length_size: 8,
        };
        let (c0, _) = w.encode(&m, &w.plan(&m).unwrap(), None).unwrap();
        let prefix = HeaderPrefix::decode(&c0[..PREFIX_LEN]).unwrap();
        assert_eq!(
            decode_chunk(&prefix, &c0, true, 8, 8),
            Err(FormatError::UnsupportedMessage(0x55))
        );
    }
}
