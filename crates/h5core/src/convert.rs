//! Element conversion between datatypes.
//!
//! Integers and floats of any supported width convert to each other in
//! either byte order. Out-of-range values clamp to the destination range
//! and NaN becomes zero. Every other class converts only to an identical
//! type.

use h5core_format::datatype::{Datatype, Endian};

use crate::error::{bail, Result};

#[derive(Clone, Copy)]
enum Num {
    Int { size: usize, signed: bool, order: Endian },
    Float { size: usize, order: Endian },
}

#[derive(Clone, Copy)]
enum Value {
    Int(i128),
    Float(f64),
}

fn numeric(dtype: &Datatype) -> Option<Num> {
    match *dtype {
        Datatype::FixedPoint {
            size,
            order,
            signed,
            ..
        } if matches!(size, 1 | 2 | 4 | 8) => Some(Num::Int {
            size: size as usize,
            signed,
            order,
        }),
        Datatype::FloatingPoint { size, order, .. } if matches!(size, 4 | 8) => {
            Some(Num::Float {
                size: size as usize,
                order,
            })
        }
        _ => None,
    }
}

/// Whether `convert` can turn `src` elements into `dst` elements.
pub fn is_convertible(src: &Datatype, dst: &Datatype) -> bool {
    src == dst || (numeric(src).is_some() && numeric(dst).is_some())
}

/// Convert a packed buffer of `src` elements into `dst` elements.
pub fn convert(src: &Datatype, dst: &Datatype, data: &[u8]) -> Result<Vec<u8>> {
    if src == dst {
        return Ok(data.to_vec());
    }
    let (Some(from), Some(to)) = (numeric(src), numeric(dst)) else {
        bail!(
            BadType,
            "no conversion from class {} to class {}",
            src.class_id(),
            dst.class_id()
        );
    };
    let src_size = src.size() as usize;
    if data.len() % src_size != 0 {
        bail!(
            BadArgs,
            "buffer of {} bytes is not a whole number of {src_size}-byte elements",
            data.len()
        );
    }
    let n = data.len() / src_size;
    let mut out = Vec::with_capacity(n * dst.size() as usize);
    for elem in data.chunks_exact(src_size) {
        store(to, load(from, elem), &mut out);
    }
    Ok(out)
}

fn raw_bits(bytes: &[u8], order: Endian) -> u64 {
    let mut v = 0u64;
    match order {
        Endian::Little => {
            for (i, &b) in bytes.iter().enumerate() {
                v |= (b as u64) << (8 * i);
            }
        }
        Endian::Big => {
            for &b in bytes {
                v = (v << 8) | b as u64;
            }
        }
    }
    v
}

fn put_bits(v: u64, size: usize, order: Endian, out: &mut Vec<u8>) {
    let le = v.to_le_bytes();
    match order {
        Endian::Little => out.extend_from_slice(&le[..size]),
        Endian::Big => out.extend(le[..size].iter().rev()),
    }
}

fn load(num: Num, bytes: &[u8]) -> Value {
    match num {
        Num::Int {
            size,
            signed,
            order,
        } => {
            let bits = raw_bits(bytes, order);
            if signed {
                let shift = 64 - 8 * size as u32;
                Value::Int((((bits << shift) as i64) >> shift) as i128)
            } else {
                Value::Int(bits as i128)
            }
        }
        Num::Float { size: 4, order } => {
            Value::Float(f32::from_bits(raw_bits(bytes, order) as u32) as f64)
        }
        Num::Float { order, .. } => Value::Float(f64::from_bits(raw_bits(bytes, order))),
    }
}

fn int_range(size: usize, signed: bool) -> (i128, i128) {
    let bits = 8 * size as u32;
    if signed {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    }
}

fn store(num: Num, value: Value, out: &mut Vec<u8>) {
    match num {
        Num::Int {
            size,
            signed,
            order,
        } => {
            let (lo, hi) = int_range(size, signed);
            let v = match value {
                Value::Int(v) => v.clamp(lo, hi),
                Value::Float(f) if f.is_nan() => 0,
                Value::Float(f) => {
                    if f <= lo as f64 {
                        lo
                    } else if f >= hi as f64 {
                        hi
                    } else {
                        f.trunc() as i128
                    }
                }
            };
            put_bits(v as u64, size, order, out);
        }
        Num::Float { size, order } => {
            let f = match value {
                Value::Int(v) => v as f64,
                Value::Float(f) => f,
            };
            let bits = if size == 4 {
                (f as f32).to_bits() as u64
            } else {
                f.to_bits()
            };
            put_bits(bits, size, order, out);
        }
    }
}
