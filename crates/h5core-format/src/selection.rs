//! Dataspace selections and their serialized form.
//!
//! Only the forms a virtual dataset mapping needs are serialized: `all`,
//! `none` and regular hyperslabs (encoding version 2).

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use core::fmt;

use crate::codec::Cursor;
use crate::error::FormatError;

/// Count value meaning "repeat without bound" in a hyperslab dimension.
pub const UNLIMITED_COUNT: u64 = u64::MAX;

const SEL_NONE: u32 = 0;
const SEL_POINTS: u32 = 1;
const SEL_HYPERSLAB: u32 = 2;
const SEL_ALL: u32 = 3;

const HYPER_FLAG_REGULAR: u8 = 0x01;

/// One dimension of a regular hyperslab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HyperslabDim {
    pub start: u64,
    pub stride: u64,
    pub count: u64,
    pub block: u64,
}

impl HyperslabDim {
    /// A single contiguous block `[start, start + len)`.
    pub fn range(start: u64, len: u64) -> HyperslabDim {
        HyperslabDim {
            start,
            stride: len.max(1),
            count: 1,
            block: len,
        }
    }

    /// Distance between block starts. A single block never steps, so a
    /// stride shorter than the block is read as the block length.
    fn pitch(&self) -> u64 {
        self.stride.max(self.block).max(1)
    }

    pub fn selected(&self) -> u64 {
        self.count.saturating_mul(self.block)
    }

    /// One past the last selected index.
    pub fn end(&self) -> u64 {
        if self.count == 0 || self.block == 0 {
            return self.start;
        }
        self.start
            .saturating_add((self.count - 1).saturating_mul(self.stride))
            .saturating_add(self.block)
    }

    /// Whether index `i` lies in a selected block.
    pub fn contains(&self, i: u64) -> bool {
        if i < self.start || self.count == 0 || self.block == 0 {
            return false;
        }
        let rel = i - self.start;
        let pitch = self.pitch();
        let n = rel / pitch;
        n < self.count && rel - n * pitch < self.block
    }

    /// Ordinal of index `i` among the selected indices of this dimension.
    pub fn ordinal(&self, i: u64) -> Option<u64> {
        if !self.contains(i) {
            return None;
        }
        let rel = i - self.start;
        let pitch = self.pitch();
        let n = rel / pitch;
        Some(n * self.block + (rel - n * pitch))
    }

    /// The index holding ordinal `k`.
    pub fn index_of(&self, k: u64) -> u64 {
        let block = self.block.max(1);
        self.start + (k / block) * self.pitch() + k % block
    }
}

/// A set of elements within a dataspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selection {
    All,
    None,
    Hyperslab(Vec<HyperslabDim>),
    /// Explicit coordinates, one `Vec` of rank entries per point.
    Points(Vec<Vec<u64>>),
}

/// Why a selection cannot be applied to a given extent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    RankMismatch { selection: usize, dataspace: usize },
    OutOfBounds { dim: usize },
    Overlapping { dim: usize },
    ZeroStride { dim: usize },
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::RankMismatch {
                selection,
                dataspace,
            } => write!(
                f,
                "selection rank {selection} differs from dataspace rank {dataspace}"
            ),
            SelectionError::OutOfBounds { dim } => {
                write!(f, "selection exceeds the extent in dimension {dim}")
            }
            SelectionError::Overlapping { dim } => {
                write!(f, "hyperslab blocks overlap in dimension {dim}")
            }
            SelectionError::ZeroStride { dim } => {
                write!(f, "hyperslab stride is zero in dimension {dim}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for SelectionError {}

impl Selection {
    /// A hyperslab covering `start[i]..start[i] + count[i]` in each dimension.
    pub fn block(start: &[u64], count: &[u64]) -> Selection {
        Selection::Hyperslab(
            start
                .iter()
                .zip(count)
                .map(|(&s, &c)| HyperslabDim::range(s, c))
                .collect(),
        )
    }

    /// Number of selected elements within `dims`.
    pub fn num_elements(&self, dims: &[u64]) -> u64 {
        match self {
            Selection::All => dims.iter().product(),
            Selection::None => 0,
            Selection::Hyperslab(h) => h.iter().map(HyperslabDim::selected).product(),
            Selection::Points(p) => p.len() as u64,
        }
    }

    pub fn has_unlimited_count(&self) -> bool {
        matches!(self, Selection::Hyperslab(h) if h.iter().any(|d| d.count == UNLIMITED_COUNT))
    }

    /// Check rank, bounds and block overlap against `dims`.
    pub fn validate(&self, dims: &[u64]) -> Result<(), SelectionError> {
        match self {
            Selection::All | Selection::None => Ok(()),
            Selection::Hyperslab(h) => {
                if h.len() != dims.len() {
                    return Err(SelectionError::RankMismatch {
                        selection: h.len(),
                        dataspace: dims.len(),
                    });
                }
                for (dim, (d, &extent)) in h.iter().zip(dims).enumerate() {
                    if d.count > 1 && d.stride == 0 {
                        return Err(SelectionError::ZeroStride { dim });
                    }
                    if d.count > 1 && d.block > d.stride {
                        return Err(SelectionError::Overlapping { dim });
                    }
                    if d.selected() > 0 && d.end() > extent {
                        return Err(SelectionError::OutOfBounds { dim });
                    }
                }
                Ok(())
            }
            Selection::Points(points) => {
                for p in points {
                    if p.len() != dims.len() {
                        return Err(SelectionError::RankMismatch {
                            selection: p.len(),
                            dataspace: dims.len(),
                        });
                    }
                    if let Some(dim) = p.iter().zip(dims).position(|(&c, &e)| c >= e) {
                        return Err(SelectionError::OutOfBounds { dim });
                    }
                }
                Ok(())
            }
        }
    }

    /// Expand to an explicit hyperslab over `dims` (`All` becomes full ranges).
    pub fn to_hyperslab(&self, dims: &[u64]) -> Option<Vec<HyperslabDim>> {
        match self {
            Selection::All => Some(dims.iter().map(|&d| HyperslabDim::range(0, d)).collect()),
            Selection::Hyperslab(h) => Some(h.clone()),
            Selection::None | Selection::Points(_) => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::new();
        match self {
            Selection::All | Selection::None => {
                let ty = if matches!(self, Selection::All) {
                    SEL_ALL
                } else {
                    SEL_NONE
                };
                buf.extend_from_slice(&ty.to_le_bytes());
                buf.extend_from_slice(&1u32.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
                buf.extend_from_slice(&0u32.to_le_bytes());
            }
            Selection::Hyperslab(h) => {
                let rank = h.len() as u32;
                buf.extend_from_slice(&SEL_HYPERSLAB.to_le_bytes());
                buf.extend_from_slice(&2u32.to_le_bytes());
                buf.push(HYPER_FLAG_REGULAR);
                buf.extend_from_slice(&(4 + rank * 32).to_le_bytes());
                buf.extend_from_slice(&rank.to_le_bytes());
                for d in h {
                    for v in [d.start, d.stride, d.count, d.block] {
                        buf.extend_from_slice(&v.to_le_bytes());
                    }
                }
            }
            Selection::Points(_) => {
                return Err(FormatError::UnsupportedVersion {
                    what: "point selection encoding",
                    version: 1,
                })
            }
        }
        Ok(buf)
    }

    /// Decode a serialized selection, returning it and the bytes consumed.
    pub fn decode(data: &[u8]) -> Result<(Selection, usize), FormatError> {
        let mut cur = Cursor::new(data);
        let ty = cur.u32()?;
        let version = cur.u32()?;
        let sel = match ty {
            SEL_ALL | SEL_NONE => {
                cur.skip(8)?;
                if ty == SEL_ALL {
                    Selection::All
                } else {
                    Selection::None
                }
            }
            SEL_HYPERSLAB if version == 2 => {
                let flags = cur.u8()?;
                let _len = cur.u32()?;
                if flags & HYPER_FLAG_REGULAR == 0 {
                    return Err(FormatError::UnsupportedVersion {
                        what: "irregular hyperslab encoding",
                        version: 2,
                    });
                }
                let rank = cur.u32()? as usize;
                if rank > crate::dataspace::MAX_RANK {
                    return Err(FormatError::RankTooLarge(rank));
                }
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dims.push(HyperslabDim {
                        start: cur.u64()?,
                        stride: cur.u64()?,
                        count: cur.u64()?,
                        block: cur.u64()?,
                    });
                }
                Selection::Hyperslab(dims)
            }
            SEL_HYPERSLAB | SEL_POINTS => {
                return Err(FormatError::UnsupportedVersion {
                    what: "selection encoding",
                    version: version as u8,
                })
            }
            other => {
                return Err(FormatError::InvalidField {
                    what: "selection type",
                    value: other as u64,
                })
            }
        };
        Ok((sel, cur.pos()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strided_ordinals() {
        let d = HyperslabDim {
            start: 2,
            stride: 5,
            count: 3,
            block: 2,
        };
        assert_eq!(d.end(), 2 + 2 * 5 + 2);
        assert!(d.contains(3));
        assert!(!d.contains(4));
        assert_eq!(d.ordinal(7), Some(2));
        assert_eq!(d.ordinal(13), Some(5));
        assert_eq!(d.index_of(5), 13);
        assert_eq!(d.selected(), 6);
    }

    #[test]
    fn single_block_covers_its_whole_length() {
        let d = HyperslabDim::range(2, 3);
        assert!(!d.contains(1));
        assert!(d.contains(4));
        assert!(!d.contains(5));
        assert_eq!(d.ordinal(2), Some(0));
        assert_eq!(d.ordinal(4), Some(2));
        assert_eq!(d.index_of(2), 4);
        assert_eq!(d.end(), 5);

        let legacy = HyperslabDim {
            start: 0,
            stride: 1,
            count: 1,
            block: 4,
        };
        assert_eq!(legacy.ordinal(3), Some(3));
        assert_eq!(legacy.index_of(3), 3);
        assert!(Selection::Hyperslab(vec![legacy]).validate(&[4]).is_ok());
    }

    #[test]
    fn validation() {
        let dims = [10, 10];
        assert!(Selection::block(&[0, 0], &[10, 10]).validate(&dims).is_ok());
        assert_eq!(
            Selection::block(&[5, 0], &[6, 1]).validate(&dims),
            Err(SelectionError::OutOfBounds { dim: 0 })
        );
        let overlap = Selection::Hyperslab(vec![
            HyperslabDim {
                start: 0,
                stride: 2,
                count: 3,
                block: 3,
            },
            HyperslabDim::range(0, 1),
        ]);
        assert_eq!(
            overlap.validate(&dims),
            Err(SelectionError::Overlapping { dim: 0 })
        );
        assert!(matches!(
            Selection::block(&[0], &[1]).validate(&dims),
            Err(SelectionError::RankMismatch { .. })
        ));
        assert!(Selection::Points(vec![vec![9, 9]]).validate(&dims).is_ok());
        assert!(Selection::Points(vec![vec![10, 0]]).validate(&dims).is_err());
    }

    #[test]
    fn encoded_forms() {
        let all = Selection::All.encode().unwrap();
        assert_eq!(all.len(), 16);
        assert_eq!(Selection::decode(&all).unwrap(), (Selection::All, 16));

        let hs = Selection::block(&[0, 4], &[2, 3]);
        let bytes = hs.encode().unwrap();
        assert_eq!(bytes.len(), 4 + 4 + 1 + 4 + 4 + 2 * 32);
        assert_eq!(Selection::decode(&bytes).unwrap(), (hs, bytes.len()));
    }

    #[test]
    fn element_counts() {
        let dims = [4, 5];
        assert_eq!(Selection::All.num_elements(&dims), 20);
        assert_eq!(Selection::None.num_elements(&dims), 0);
        assert_eq!(Selection::block(&[1, 1], &[2, 2]).num_elements(&dims), 4);
    }
}
