//! Datatype message codec (message type 0x0003).
//!
//! Covers every storable class: fixed-point, floating-point, time, string,
//! bitfield, opaque, compound, reference, enumeration, variable-length and
//! array. Versions 1 to 3 are decoded; the encoder picks the lowest
//! version able to represent the type, raised to a caller-supplied floor.

#[cfg(not(feature = "std"))]
use alloc::{boxed::Box, string::String, vec::Vec};

use byteorder::{ByteOrder, LittleEndian};

use crate::codec::{pad_to, put_uint, Cursor};
use crate::error::FormatError;

/// Byte order of atomic numeric data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// The byte order of the running machine.
    pub const fn native() -> Endian {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }
}

/// String padding type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

/// Character set encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

/// Reference flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    Object,
    DatasetRegion,
}

/// Sequence or string flavor of a variable-length type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VlenKind {
    Sequence,
    String {
        padding: StringPadding,
        charset: CharacterSet,
    },
}

/// A member of a compound datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundMember {
    pub name: String,
    pub byte_offset: u32,
    pub datatype: Datatype,
}

/// A member of an enumeration datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumMember {
    pub name: String,
    /// Raw value bytes, `base.size()` long.
    pub value: Vec<u8>,
}

/// A decoded datatype.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        order: Endian,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    FloatingPoint {
        size: u32,
        order: Endian,
        sign_location: u8,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    Time {
        size: u32,
        order: Endian,
        bit_precision: u16,
    },
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    BitField {
        size: u32,
        order: Endian,
        bit_offset: u16,
        bit_precision: u16,
    },
    Opaque {
        size: u32,
        tag: String,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Reference {
        size: u32,
        ref_type: ReferenceType,
    },
    Enumeration {
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    VariableLength {
        kind: VlenKind,
        base: Box<Datatype>,
    },
    Array {
        base: Box<Datatype>,
        dims: Vec<u32>,
    },
}

/// Size of an in-file variable-length descriptor: length(4) + heap id(8 + 4).
pub const VLEN_DESCRIPTOR_SIZE: u32 = 16;

impl Datatype {
    /// An integer type of `size` bytes.
    pub fn integer(size: u32, signed: bool, order: Endian) -> Datatype {
        Datatype::FixedPoint {
            size,
            order,
            signed,
            bit_offset: 0,
            bit_precision: (size * 8) as u16,
        }
    }

    /// IEEE-754 binary32.
    pub fn float32(order: Endian) -> Datatype {
        Datatype::FloatingPoint {
            size: 4,
            order,
            sign_location: 31,
            bit_offset: 0,
            bit_precision: 32,
            exponent_location: 23,
            exponent_size: 8,
            mantissa_location: 0,
            mantissa_size: 23,
            exponent_bias: 127,
        }
    }

    /// IEEE-754 binary64.
    pub fn float64(order: Endian) -> Datatype {
        Datatype::FloatingPoint {
            size: 8,
            order,
            sign_location: 63,
            bit_offset: 0,
            bit_precision: 64,
            exponent_location: 52,
            exponent_size: 11,
            mantissa_location: 0,
            mantissa_size: 52,
            exponent_bias: 1023,
        }
    }

    /// A fixed-length, null-terminated ASCII string.
    pub fn fixed_string(size: u32) -> Datatype {
        Datatype::String {
            size,
            padding: StringPadding::NullTerminate,
            charset: CharacterSet::Ascii,
        }
    }

    /// A variable-length UTF-8 string.
    pub fn vlen_string() -> Datatype {
        Datatype::VariableLength {
            kind: VlenKind::String {
                padding: StringPadding::NullTerminate,
                charset: CharacterSet::Utf8,
            },
            base: Box::new(Datatype::integer(1, false, Endian::Little)),
        }
    }

    /// Class id as stored in the low nibble of the first byte.
    pub fn class_id(&self) -> u8 {
        match self {
            Datatype::FixedPoint { .. } => 0,
            Datatype::FloatingPoint { .. } => 1,
            Datatype::Time { .. } => 2,
            Datatype::String { .. } => 3,
            Datatype::BitField { .. } => 4,
            Datatype::Opaque { .. } => 5,
            Datatype::Compound { .. } => 6,
            Datatype::Reference { .. } => 7,
            Datatype::Enumeration { .. } => 8,
            Datatype::VariableLength { .. } => 9,
            Datatype::Array { .. } => 10,
        }
    }

    /// Size in bytes of one element of this type.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. } => *size,
            Datatype::Enumeration { base, .. } => base.size(),
            Datatype::VariableLength { .. } => VLEN_DESCRIPTOR_SIZE,
            Datatype::Array { base, dims } => {
                dims.iter().fold(base.size(), |acc, &d| acc.saturating_mul(d))
            }
        }
    }

    /// Byte order of an atomic type, `None` for composite or byte-string types.
    pub fn order(&self) -> Option<Endian> {
        match self {
            Datatype::FixedPoint { order, .. }
            | Datatype::FloatingPoint { order, .. }
            | Datatype::Time { order, .. }
            | Datatype::BitField { order, .. } => Some(*order),
            Datatype::Enumeration { base, .. } => base.order(),
            _ => None,
        }
    }

    /// `true` if any part of the type is variable-length.
    pub fn has_vlen(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } => true,
            Datatype::Compound { members, .. } => members.iter().any(|m| m.datatype.has_vlen()),
            Datatype::Array { base, .. } | Datatype::Enumeration { base, .. } => base.has_vlen(),
            _ => false,
        }
    }

    /// `true` if the type embeds file-bound values (vlen heap ids or references)
    /// and must be re-tagged when bound to a different file.
    pub fn is_relocatable(&self) -> bool {
        match self {
            Datatype::VariableLength { .. } | Datatype::Reference { .. } => true,
            Datatype::Compound { members, .. } => {
                members.iter().any(|m| m.datatype.is_relocatable())
            }
            Datatype::Array { base, .. } | Datatype::Enumeration { base, .. } => {
                base.is_relocatable()
            }
            _ => false,
        }
    }

    /// Check that the type can be stored: nonzero sizes, compound members
    /// inside the compound and not overlapping, integer enum bases.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.size() == 0 {
            return Err("datatype has zero size");
        }
        match self {
            Datatype::Compound { size, members } => {
                if members.is_empty() {
                    return Err("compound datatype has no members");
                }
                let mut spans: Vec<(u32, u32)> = Vec::with_capacity(members.len());
                for m in members {
                    m.datatype.validate()?;
                    let end = m
                        .byte_offset
                        .checked_add(m.datatype.size())
                        .ok_or("compound member offset overflows")?;
                    if end > *size {
                        return Err("compound member extends past the compound size");
                    }
                    spans.push((m.byte_offset, end));
                }
                spans.sort_unstable();
                if spans.windows(2).any(|w| w[0].1 > w[1].0) {
                    return Err("compound members overlap");
                }
                Ok(())
            }
            Datatype::Enumeration { base, members } => {
                if !matches!(**base, Datatype::FixedPoint { .. }) {
                    return Err("enumeration base must be an integer type");
                }
                if members.iter().any(|m| m.value.len() != base.size() as usize) {
                    return Err("enumeration value width differs from its base type");
                }
                Ok(())
            }
            Datatype::Array { base, dims } => {
                if dims.is_empty() || dims.iter().any(|&d| d == 0) {
                    return Err("array datatype has an empty dimension");
                }
                base.validate()
            }
            Datatype::VariableLength { base, .. } => base.validate(),
            _ => Ok(()),
        }
    }

    /// Lowest encoding version able to represent this type.
    pub fn natural_version(&self) -> u8 {
        match self {
            Datatype::Array { base, .. } => base.natural_version().max(2),
            Datatype::Compound { members, .. } => members
                .iter()
                .map(|m| m.datatype.natural_version())
                .max()
                .unwrap_or(1),
            Datatype::Enumeration { base, .. } | Datatype::VariableLength { base, .. } => {
                base.natural_version()
            }
            _ => 1,
        }
    }

    /// Decode a datatype message, returning the type and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Datatype, usize), FormatError> {
        let mut cur = Cursor::new(data);
        let dt = Self::decode_at(&mut cur)?;
        Ok((dt, cur.pos()))
    }

    fn decode_at(cur: &mut Cursor<'_>) -> Result<Datatype, FormatError> {
        let class_and_version = cur.u8()?;
        let class_id = class_and_version & 0x0F;
        let version = class_and_version >> 4;
        if !(1..=3).contains(&version) {
            return Err(FormatError::InvalidDatatypeVersion {
                class: class_id,
                version,
            });
        }
        let bits = cur.bytes(3)?;
        let (bf0, bf1) = (bits[0], bits[1]);
        let size = cur.u32()?;
        let order = if bf0 & 0x01 == 0 {
            Endian::Little
        } else {
            Endian::Big
        };

        match class_id {
            0 => {
                let bit_offset = cur.u16()?;
                let bit_precision = cur.u16()?;
                Ok(Datatype::FixedPoint {
                    size,
                    order,
                    signed: bf0 & 0x08 != 0,
                    bit_offset,
                    bit_precision,
                })
            }
            1 => {
                if bf0 & 0x40 != 0 {
                    // VAX ordering is not representable by this engine.
                    return Err(FormatError::InvalidField {
                        what: "floating-point byte order",
                        value: 2,
                    });
                }
                let bit_offset = cur.u16()?;
                let bit_precision = cur.u16()?;
                let exponent_location = cur.u8()?;
                let exponent_size = cur.u8()?;
                let mantissa_location = cur.u8()?;
                let mantissa_size = cur.u8()?;
                let exponent_bias = cur.u32()?;
                Ok(Datatype::FloatingPoint {
                    size,
                    order,
                    sign_location: bf1,
                    bit_offset,
                    bit_precision,
                    exponent_location,
                    exponent_size,
                    mantissa_location,
                    mantissa_size,
                    exponent_bias,
                })
            }
            2 => Ok(Datatype::Time {
                size,
                order,
                bit_precision: cur.u16()?,
            }),
            3 => Ok(Datatype::String {
                size,
                padding: decode_padding(bf0 & 0x0F)?,
                charset: decode_charset(bf0 >> 4)?,
            }),
            4 => {
                let bit_offset = cur.u16()?;
                let bit_precision = cur.u16()?;
                Ok(Datatype::BitField {
                    size,
                    order,
                    bit_offset,
                    bit_precision,
                })
            }
            5 => {
                let tag_len = bf0 as usize;
                let raw = cur.bytes(tag_len)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Ok(Datatype::Opaque {
                    size,
                    tag: String::from_utf8_lossy(&raw[..end]).into_owned(),
                })
            }
            6 => {
                let nmembers = u16::from_le_bytes([bf0, bf1]) as usize;
                let mut members = Vec::with_capacity(nmembers);
                for _ in 0..nmembers {
                    let start = cur.pos();
                    let name = cur.cstr()?;
                    let byte_offset = if version >= 3 {
                        cur.uint(compound_offset_width(size))? as u32
                    } else {
                        cur.align_to(start, 8)?;
                        cur.u32()?
                    };
                    if version == 1 {
                        // ndims(1) reserved(3) permutation(4) reserved(4) dims(4 x 4)
                        let ndims = cur.u8()?;
                        if ndims != 0 {
                            return Err(FormatError::InvalidField {
                                what: "v1 compound member dimensionality",
                                value: ndims as u64,
                            });
                        }
                        cur.skip(3 + 4 + 4 + 16)?;
                    }
                    let datatype = Self::decode_at(cur)?;
                    members.push(CompoundMember {
                        name,
                        byte_offset,
                        datatype,
                    });
                }
                Ok(Datatype::Compound { size, members })
            }
            7 => {
                let ref_type = match bf0 & 0x0F {
                    0 => ReferenceType::Object,
                    1 => ReferenceType::DatasetRegion,
                    other => {
                        return Err(FormatError::InvalidField {
                            what: "reference type",
                            value: other as u64,
                        })
                    }
                };
                Ok(Datatype::Reference { size, ref_type })
            }
            8 => {
                let nmembers = u16::from_le_bytes([bf0, bf1]) as usize;
                let base = Self::decode_at(cur)?;
                let mut names = Vec::with_capacity(nmembers);
                for _ in 0..nmembers {
                    let start = cur.pos();
                    names.push(cur.cstr()?);
                    if version < 3 {
                        cur.align_to(start, 8)?;
                    }
                }
                let width = base.size() as usize;
                let mut members = Vec::with_capacity(nmembers);
                for name in names {
                    members.push(EnumMember {
                        name,
                        value: cur.bytes(width)?.to_vec(),
                    });
                }
                Ok(Datatype::Enumeration {
                    base: Box::new(base),
                    members,
                })
            }
            9 => {
                let kind = match bf0 & 0x0F {
                    0 => VlenKind::Sequence,
                    1 => VlenKind::String {
                        padding: decode_padding(bf0 >> 4)?,
                        charset: decode_charset(bf1 & 0x0F)?,
                    },
                    other => {
                        return Err(FormatError::InvalidField {
                            what: "variable-length kind",
                            value: other as u64,
                        })
                    }
                };
                let base = Self::decode_at(cur)?;
                Ok(Datatype::VariableLength {
                    kind,
                    base: Box::new(base),
                })
            }
            10 => {
                if version < 2 {
                    return Err(FormatError::InvalidDatatypeVersion {
                        class: class_id,
                        version,
                    });
                }
                let ndims = cur.u8()? as usize;
                if version == 2 {
                    cur.skip(3)?;
                }
                let mut dims = Vec::with_capacity(ndims);
                for _ in 0..ndims {
                    dims.push(cur.u32()?);
                }
                if version == 2 {
                    cur.skip(ndims * 4)?;
                }
                let base = Self::decode_at(cur)?;
                Ok(Datatype::Array {
                    base: Box::new(base),
                    dims,
                })
            }
            other => Err(FormatError::InvalidDatatypeClass(other)),
        }
    }

    /// Encode at `max(floor, natural_version())`.
    pub fn encode(&self, floor: u8) -> Vec<u8> {
        let version = self.natural_version().max(floor).clamp(1, 3);
        let mut buf = Vec::with_capacity(16);
        self.encode_into(&mut buf, version);
        buf
    }

    fn encode_into(&self, buf: &mut Vec<u8>, version: u8) {
        let order_bit = |o: &Endian| u8::from(*o == Endian::Big);
        let header = |buf: &mut Vec<u8>, bits: [u8; 3], size: u32| {
            buf.push((version << 4) | self.class_id());
            buf.extend_from_slice(&bits);
            buf.extend_from_slice(&size.to_le_bytes());
        };

        match self {
            Datatype::FixedPoint {
                size,
                order,
                signed,
                bit_offset,
                bit_precision,
            } => {
                let bf0 = order_bit(order) | if *signed { 0x08 } else { 0 };
                header(buf, [bf0, 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
            }
            Datatype::FloatingPoint {
                size,
                order,
                sign_location,
                bit_offset,
                bit_precision,
                exponent_location,
                exponent_size,
                mantissa_location,
                mantissa_size,
                exponent_bias,
            } => {
                // Mantissa normalization 2: the leading one is implied.
                let bf0 = order_bit(order) | 0x20;
                header(buf, [bf0, *sign_location, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
                buf.extend_from_slice(&[
                    *exponent_location,
                    *exponent_size,
                    *mantissa_location,
                    *mantissa_size,
                ]);
                buf.extend_from_slice(&exponent_bias.to_le_bytes());
            }
            Datatype::Time {
                size,
                order,
                bit_precision,
            } => {
                header(buf, [order_bit(order), 0, 0], *size);
                buf.extend_from_slice(&bit_precision.to_le_bytes());
            }
            Datatype::String {
                size,
                padding,
                charset,
            } => {
                let bf0 = encode_padding(*padding) | (encode_charset(*charset) << 4);
                header(buf, [bf0, 0, 0], *size);
            }
            Datatype::BitField {
                size,
                order,
                bit_offset,
                bit_precision,
            } => {
                header(buf, [order_bit(order), 0, 0], *size);
                buf.extend_from_slice(&bit_offset.to_le_bytes());
                buf.extend_from_slice(&bit_precision.to_le_bytes());
            }
            Datatype::Opaque { size, tag } => {
                let padded = (tag.len() + 1).div_ceil(8) * 8;
                header(buf, [padded as u8, 0, 0], *size);
                let start = buf.len();
                buf.extend_from_slice(tag.as_bytes());
                buf.resize(start + padded, 0);
            }
            Datatype::Compound { size, members } => {
                let n = members.len() as u16;
                let [lo, hi] = n.to_le_bytes();
                header(buf, [lo, hi, 0], *size);
                for m in members {
                    let start = buf.len();
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                    if version >= 3 {
                        put_uint(buf, m.byte_offset as u64, compound_offset_width(*size));
                    } else {
                        pad_to(buf, start, 8);
                        buf.extend_from_slice(&m.byte_offset.to_le_bytes());
                        if version == 1 {
                            buf.extend_from_slice(&[0u8; 3 + 1 + 4 + 4 + 16]);
                        }
                    }
                    m.datatype.encode_into(buf, version);
                }
            }
            Datatype::Reference { size, ref_type } => {
                let bf0 = match ref_type {
                    ReferenceType::Object => 0,
                    ReferenceType::DatasetRegion => 1,
                };
                header(buf, [bf0, 0, 0], *size);
            }
            Datatype::Enumeration { base, members } => {
                let n = members.len() as u16;
                let [lo, hi] = n.to_le_bytes();
                header(buf, [lo, hi, 0], base.size());
                base.encode_into(buf, version);
                for m in members {
                    let start = buf.len();
                    buf.extend_from_slice(m.name.as_bytes());
                    buf.push(0);
                    if version < 3 {
                        pad_to(buf, start, 8);
                    }
                }
                for m in members {
                    buf.extend_from_slice(&m.value);
                }
            }
            Datatype::VariableLength { kind, base } => {
                let (bf0, bf1) = match kind {
                    VlenKind::Sequence => (0u8, 0u8),
                    VlenKind::String { padding, charset } => {
                        (1 | (encode_padding(*padding) << 4), encode_charset(*charset))
                    }
                };
                header(buf, [bf0, bf1, 0], VLEN_DESCRIPTOR_SIZE);
                base.encode_into(buf, version);
            }
            Datatype::Array { base, dims } => {
                header(buf, [0, 0, 0], self.size());
                buf.push(dims.len() as u8);
                if version == 2 {
                    buf.extend_from_slice(&[0u8; 3]);
                }
                for d in dims {
                    buf.extend_from_slice(&d.to_le_bytes());
                }
                if version == 2 {
                    for i in 0..dims.len() as u32 {
                        buf.extend_from_slice(&i.to_le_bytes());
                    }
                }
                base.encode_into(buf, version);
            }
        }
    }

    /// Read the first element-size field of an encoded datatype without a full decode.
    pub fn peek_size(data: &[u8]) -> Result<u32, FormatError> {
        if data.len() < 8 {
            return Err(FormatError::UnexpectedEof {
                expected: 8,
                available: data.len(),
            });
        }
        Ok(LittleEndian::read_u32(&data[4..8]))
    }
}

fn compound_offset_width(size: u32) -> usize {
    if size <= 0xFF {
        1
    } else if size <= 0xFFFF {
        2
    } else if size <= 0xFF_FFFF {
        3
    } else {
        4
    }
}

fn decode_padding(val: u8) -> Result<StringPadding, FormatError> {
    match val {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        _ => Err(FormatError::InvalidField {
            what: "string padding",
            value: val as u64,
        }),
    }
}

fn encode_padding(p: StringPadding) -> u8 {
    match p {
        StringPadding::NullTerminate => 0,
        StringPadding::NullPad => 1,
        StringPadding::SpacePad => 2,
    }
}

fn decode_charset(val: u8) -> Result<CharacterSet, FormatError> {
    match val {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        _ => Err(FormatError::InvalidField {
            what: "character set",
            value: val as u64,
        }),
    }
}

fn encode_charset(c: CharacterSet) -> u8 {
    match c {
        CharacterSet::Ascii => 0,
        CharacterSet::Utf8 => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> Datatype {
        Datatype::Compound {
            size: 16,
            members: vec![
                CompoundMember {
                    name: "x".into(),
                    byte_offset: 0,
                    datatype: Datatype::float64(Endian::Little),
                },
                CompoundMember {
                    name: "id".into(),
                    byte_offset: 8,
                    datatype: Datatype::integer(4, true, Endian::Little),
                },
            ],
        }
    }

    #[test]
    fn int32_le_layout() {
        let bytes = Datatype::integer(4, true, Endian::Little).encode(1);
        assert_eq!(bytes, vec![0x10, 0x08, 0, 0, 4, 0, 0, 0, 0, 0, 32, 0]);
    }

    #[test]
    fn float32_big_endian_layout() {
        let bytes = Datatype::float32(Endian::Big).encode(1);
        assert_eq!(bytes[0], 0x11);
        assert_eq!(bytes[1], 0x21);
        assert_eq!(bytes[2], 31);
        let (dt, used) = Datatype::decode(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(dt, Datatype::float32(Endian::Big));
    }

    #[test]
    fn compound_versions_differ_in_member_encoding() {
        let v1 = point().encode(1);
        let v3 = point().encode(3);
        assert!(v1.len() > v3.len());
        assert_eq!(Datatype::decode(&v1).unwrap().0, point());
        assert_eq!(Datatype::decode(&v3).unwrap().0, point());
    }

    #[test]
    fn array_requires_version_two() {
        let arr = Datatype::Array {
            base: Box::new(Datatype::integer(2, false, Endian::Little)),
            dims: vec![3, 2],
        };
        assert_eq!(arr.size(), 12);
        let bytes = arr.encode(1);
        assert_eq!(bytes[0] >> 4, 2);
        assert_eq!(Datatype::decode(&bytes).unwrap().0, arr);
    }

    #[test]
    fn enum_names_and_values() {
        let e = Datatype::Enumeration {
            base: Box::new(Datatype::integer(1, false, Endian::Little)),
            members: vec![
                EnumMember {
                    name: "RED".into(),
                    value: vec![0],
                },
                EnumMember {
                    name: "GREEN".into(),
                    value: vec![1],
                },
            ],
        };
        for floor in [1, 3] {
            let bytes = e.encode(floor);
            assert_eq!(Datatype::decode(&bytes).unwrap().0, e);
        }
    }

    #[test]
    fn vlen_string_is_relocatable() {
        let vs = Datatype::vlen_string();
        assert!(vs.has_vlen());
        assert!(vs.is_relocatable());
        assert_eq!(vs.size(), VLEN_DESCRIPTOR_SIZE);
        assert!(!Datatype::float64(Endian::Little).is_relocatable());
        let bytes = vs.encode(1);
        assert_eq!(Datatype::decode(&bytes).unwrap().0, vs);
    }

    #[test]
    fn validation_catches_overlap_and_overflow() {
        assert!(point().validate().is_ok());
        let overlapping = Datatype::Compound {
            size: 8,
            members: vec![
                CompoundMember {
                    name: "a".into(),
                    byte_offset: 0,
                    datatype: Datatype::integer(4, true, Endian::Little),
                },
                CompoundMember {
                    name: "b".into(),
                    byte_offset: 2,
                    datatype: Datatype::integer(4, true, Endian::Little),
                },
            ],
        };
        assert_eq!(overlapping.validate(), Err("compound members overlap"));
        let too_small = Datatype::Compound {
            size: 4,
            members: vec![CompoundMember {
                name: "a".into(),
                byte_offset: 2,
                datatype: Datatype::integer(4, true, Endian::Little),
            }],
        };
        assert!(too_small.validate().is_err());
        assert!(Datatype::fixed_string(0).validate().is_err());
    }

    #[test]
    fn opaque_tag_padded_to_eight() {
        let op = Datatype::Opaque {
            size: 7,
            tag: "blob".into(),
        };
        let bytes = op.encode(1);
        assert_eq!(bytes[1], 8);
        assert_eq!(bytes.len(), 16);
        assert_eq!(Datatype::decode(&bytes).unwrap().0, op);
    }

    #[test]
    fn bad_class_rejected() {
        let bytes = [0x1Cu8, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(
            Datatype::decode(&bytes),
            Err(FormatError::InvalidDatatypeClass(12))
        );
    }
}
