//! Dataspace message codec (message type 0x0001).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::codec::{put_uint, Cursor};
use crate::error::FormatError;

/// Highest rank the format accepts.
pub const MAX_RANK: usize = 32;

/// Maximum-dimension value meaning "may grow without bound".
pub const UNLIMITED: u64 = u64::MAX;

/// Shape class of a dataspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataspaceKind {
    Scalar,
    Simple,
    Null,
}

/// Current and maximum extent of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dataspace {
    pub kind: DataspaceKind,
    pub dims: Vec<u64>,
    /// Per-dimension maximum; `UNLIMITED` for unbounded. Same length as `dims`.
    pub max_dims: Vec<u64>,
}

impl Dataspace {
    pub fn scalar() -> Dataspace {
        Dataspace {
            kind: DataspaceKind::Scalar,
            dims: Vec::new(),
            max_dims: Vec::new(),
        }
    }

    pub fn null() -> Dataspace {
        Dataspace {
            kind: DataspaceKind::Null,
            dims: Vec::new(),
            max_dims: Vec::new(),
        }
    }

    /// A simple dataspace whose maximum equals its current extent.
    pub fn simple(dims: &[u64]) -> Dataspace {
        Dataspace {
            kind: DataspaceKind::Simple,
            dims: dims.to_vec(),
            max_dims: dims.to_vec(),
        }
    }

    /// A simple dataspace with explicit maxima.
    pub fn with_max(dims: &[u64], max_dims: &[u64]) -> Dataspace {
        Dataspace {
            kind: DataspaceKind::Simple,
            dims: dims.to_vec(),
            max_dims: max_dims.to_vec(),
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements; zero for a null dataspace, one for a scalar.
    pub fn num_elements(&self) -> u64 {
        match self.kind {
            DataspaceKind::Null => 0,
            DataspaceKind::Scalar => 1,
            DataspaceKind::Simple => self.dims.iter().product(),
        }
    }

    /// Checked element count; `None` on overflow.
    pub fn checked_num_elements(&self) -> Option<u64> {
        match self.kind {
            DataspaceKind::Null => Some(0),
            DataspaceKind::Scalar => Some(1),
            DataspaceKind::Simple => self.dims.iter().try_fold(1u64, |acc, &d| acc.checked_mul(d)),
        }
    }

    pub fn is_unlimited(&self, dim: usize) -> bool {
        self.max_dims.get(dim) == Some(&UNLIMITED)
    }

    pub fn has_unlimited(&self) -> bool {
        self.max_dims.iter().any(|&m| m == UNLIMITED)
    }

    /// `true` when the maximum extent differs from the current one somewhere.
    pub fn is_extendible(&self) -> bool {
        self.dims.iter().zip(&self.max_dims).any(|(d, m)| d != m)
    }

    /// Decode a dataspace message body.
    pub fn decode(data: &[u8], length_size: u8) -> Result<Dataspace, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        let rank = cur.u8()? as usize;
        let flags = cur.u8()?;
        if rank > MAX_RANK {
            return Err(FormatError::RankTooLarge(rank));
        }
        let kind = match version {
            1 => {
                cur.skip(5)?;
                if rank == 0 {
                    DataspaceKind::Scalar
                } else {
                    DataspaceKind::Simple
                }
            }
            2 => match cur.u8()? {
                0 => DataspaceKind::Scalar,
                1 => DataspaceKind::Simple,
                2 => DataspaceKind::Null,
                t => return Err(FormatError::InvalidDataspaceType(t)),
            },
            v => {
                return Err(FormatError::UnsupportedVersion {
                    what: "dataspace",
                    version: v,
                })
            }
        };
        let mut dims = Vec::with_capacity(rank);
        for _ in 0..rank {
            dims.push(cur.length(length_size)?);
        }
        let max_dims = if flags & 0x01 != 0 {
            let mut max = Vec::with_capacity(rank);
            for _ in 0..rank {
                let raw = cur.length(length_size)?;
                max.push(if is_all_ones(raw, length_size) {
                    UNLIMITED
                } else {
                    raw
                });
            }
            max
        } else {
            dims.clone()
        };
        Ok(Dataspace {
            kind,
            dims,
            max_dims,
        })
    }

    /// Encode with the given message version (1 or 2). Null dataspaces are
    /// only representable in version 2 and are promoted.
    pub fn encode(&self, version: u8, length_size: u8) -> Vec<u8> {
        let version = if self.kind == DataspaceKind::Null {
            2
        } else {
            version.clamp(1, 2)
        };
        let rank = self.dims.len();
        let has_max = self.is_extendible();
        let flags = u8::from(has_max);
        let mut buf = Vec::with_capacity(8 + rank * 16);
        buf.push(version);
        buf.push(rank as u8);
        buf.push(flags);
        if version == 1 {
            buf.extend_from_slice(&[0u8; 5]);
        } else {
            buf.push(match self.kind {
                DataspaceKind::Scalar => 0,
                DataspaceKind::Simple => 1,
                DataspaceKind::Null => 2,
            });
        }
        for &d in &self.dims {
            put_uint(&mut buf, d, length_size as usize);
        }
        if has_max {
            for &m in &self.max_dims {
                put_uint(&mut buf, m, length_size as usize);
            }
        }
        buf
    }
}

fn is_all_ones(value: u64, size: u8) -> bool {
    if size >= 8 {
        value == u64::MAX
    } else {
        value == (1u64 << (size as u32 * 8)) - 1
    }
}
