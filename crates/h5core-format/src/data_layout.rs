//! Data layout message codec (message type 0x0008), versions 3 and 4.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use crate::codec::{bytes_needed, put_addr, put_uint, Cursor};
use crate::error::FormatError;

/// Largest raw-data buffer a compact layout may hold inside its header.
pub const MAX_COMPACT_SIZE: usize = 65520;

/// v4 chunked flag: partial edge chunks are stored unfiltered.
pub const FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS: u8 = 0x01;
/// v4 chunked flag: the single-chunk index carries a filtered size and mask.
pub const FLAG_SINGLE_INDEX_WITH_FILTER: u8 = 0x02;

/// Where and how chunk addresses are indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndex {
    /// Version 1 B-tree (layout version 3 only).
    BTreeV1 {
        /// Root node, absent until the first chunk is stored.
        addr: Option<u64>,
    },
    /// The whole dataset is one chunk.
    SingleChunk {
        /// The chunk itself.
        addr: Option<u64>,
        /// On-disk size and filter mask when the pipeline is non-empty.
        filtered: Option<(u64, u32)>,
    },
    /// Chunks are laid out back to back from `addr` in row-major order.
    Implicit {
        /// First chunk of the block.
        addr: Option<u64>,
    },
    /// A fixed array of chunk records.
    FixedArray {
        /// Log2 of the number of records per data block page.
        page_bits: u8,
        /// Array header.
        addr: Option<u64>,
    },
}

impl ChunkIndex {
    fn type_id(&self) -> u8 {
        match self {
            ChunkIndex::BTreeV1 { .. } => 0,
            ChunkIndex::SingleChunk { .. } => 1,
            ChunkIndex::Implicit { .. } => 2,
            ChunkIndex::FixedArray { .. } => 3,
        }
    }

    pub fn addr(&self) -> Option<u64> {
        match self {
            ChunkIndex::BTreeV1 { addr }
            | ChunkIndex::SingleChunk { addr, .. }
            | ChunkIndex::Implicit { addr }
            | ChunkIndex::FixedArray { addr, .. } => *addr,
        }
    }
}

/// Storage description of a dataset's raw data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    /// Raw data stored inside the layout message.
    Compact {
        /// The whole dataset, at most [`MAX_COMPACT_SIZE`] bytes.
        data: Vec<u8>,
    },
    /// One block of file space.
    Contiguous {
        /// Start of the block, absent until storage is allocated.
        addr: Option<u64>,
        /// Block size in bytes.
        size: u64,
    },
    /// Fixed-shape tiles located through an index.
    Chunked {
        /// Tile shape, one entry per dataspace dimension.
        dims: Vec<u32>,
        /// Datatype size in bytes, stored as the trailing chunk dimension.
        element_size: u32,
        /// Version 4 chunked flags (`FLAG_*`).
        flags: u8,
        index: ChunkIndex,
    },
    /// Mappings from source datasets, kept in the global heap.
    Virtual {
        /// Global heap collection holding the encoded mappings.
        heap_addr: Option<u64>,
        /// Object index within that collection.
        heap_index: u32,
    },
}

/// A decoded layout message with its version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutMessage {
    pub version: u8,
    pub layout: DataLayout,
}

impl LayoutMessage {
    pub fn decode(data: &[u8], offset_size: u8, length_size: u8) -> Result<Self, FormatError> {
        let mut cur = Cursor::new(data);
        let version = cur.u8()?;
        if !(3..=4).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                what: "data layout message",
                version,
            });
        }
        let class = cur.u8()?;
        let layout = match class {
            0 => {
                let n = cur.u16()? as usize;
                DataLayout::Compact {
                    data: cur.bytes(n)?.to_vec(),
                }
            }
            1 => {
                let addr = cur.addr(offset_size)?;
                let size = cur.length(length_size)?;
                DataLayout::Contiguous { addr, size }
            }
            2 if version == 3 => {
                let ndims = cur.u8()? as usize;
                let addr = cur.addr(offset_size)?;
                if ndims < 2 {
                    return Err(FormatError::InvalidField {
                        what: "chunked layout dimensionality",
                        value: ndims as u64,
                    });
                }
                let mut dims = Vec::with_capacity(ndims - 1);
                for _ in 0..ndims - 1 {
                    dims.push(cur.u32()?);
                }
                let element_size = cur.u32()?;
                DataLayout::Chunked {
                    dims,
                    element_size,
                    flags: 0,
                    index: ChunkIndex::BTreeV1 { addr },
                }
            }
            2 => {
                let flags = cur.u8()?;
                let ndims = cur.u8()? as usize;
                let width = cur.u8()? as usize;
                if ndims < 2 {
                    return Err(FormatError::InvalidField {
                        what: "chunked layout dimensionality",
                        value: ndims as u64,
                    });
                }
                let mut dims = Vec::with_capacity(ndims - 1);
                for _ in 0..ndims - 1 {
                    dims.push(narrow_dim(cur.uint(width)?)?);
                }
                let element_size = narrow_dim(cur.uint(width)?)?;
                let index = match cur.u8()? {
                    1 => {
                        let filtered = if flags & FLAG_SINGLE_INDEX_WITH_FILTER != 0 {
                            let size = cur.length(length_size)?;
                            let mask = cur.u32()?;
                            Some((size, mask))
                        } else {
                            None
                        };
                        let addr = cur.addr(offset_size)?;
                        ChunkIndex::SingleChunk { addr, filtered }
                    }
                    2 => ChunkIndex::Implicit {
                        addr: cur.addr(offset_size)?,
                    },
                    3 => {
                        let page_bits = cur.u8()?;
                        let addr = cur.addr(offset_size)?;
                        ChunkIndex::FixedArray { page_bits, addr }
                    }
                    t @ (4 | 5) => {
                        return Err(FormatError::UnsupportedVersion {
                            what: "chunk index type",
                            version: t,
                        })
                    }
                    t => return Err(FormatError::InvalidChunkIndexType(t)),
                };
                DataLayout::Chunked {
                    dims,
                    element_size,
                    flags,
                    index,
                }
            }
            3 if version == 4 => {
                let heap_addr = cur.addr(offset_size)?;
                let heap_index = cur.u32()?;
                DataLayout::Virtual {
                    heap_addr,
                    heap_index,
                }
            }
            c => return Err(FormatError::InvalidLayoutClass(c)),
        };
        Ok(LayoutMessage { version, layout })
    }

    /// Encode the message. Version 3 can only describe a v1 B-tree index
    /// and cannot hold a virtual layout.
    pub fn encode(&self, offset_size: u8, length_size: u8) -> Result<Vec<u8>, FormatError> {
        let mut buf = Vec::with_capacity(32);
        buf.push(self.version);
        match &self.layout {
            DataLayout::Compact { data } => {
                if data.len() > MAX_COMPACT_SIZE {
                    return Err(FormatError::MessageTooLarge(data.len()));
                }
                buf.push(0);
                buf.extend_from_slice(&(data.len() as u16).to_le_bytes());
                buf.extend_from_slice(data);
            }
            DataLayout::Contiguous { addr, size } => {
                buf.push(1);
                put_addr(&mut buf, *addr, offset_size);
                put_uint(&mut buf, *size, length_size as usize);
            }
            DataLayout::Chunked {
                dims,
                element_size,
                flags,
                index,
            } => {
                buf.push(2);
                if self.version == 3 {
                    let ChunkIndex::BTreeV1 { addr } = index else {
                        return Err(FormatError::InvalidChunkIndexType(index.type_id()));
                    };
                    buf.push((dims.len() + 1) as u8);
                    put_addr(&mut buf, *addr, offset_size);
                    for d in dims {
                        buf.extend_from_slice(&d.to_le_bytes());
                    }
                    buf.extend_from_slice(&element_size.to_le_bytes());
                } else {
                    if matches!(index, ChunkIndex::BTreeV1 { .. }) {
                        return Err(FormatError::InvalidChunkIndexType(0));
                    }
                    let mut flags = *flags & FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS;
                    if matches!(
                        index,
                        ChunkIndex::SingleChunk {
                            filtered: Some(_),
                            ..
                        }
                    ) {
                        flags |= FLAG_SINGLE_INDEX_WITH_FILTER;
                    }
                    let widest = dims
                        .iter()
                        .copied()
                        .chain(core::iter::once(*element_size))
                        .max()
                        .unwrap_or(1);
                    let width = bytes_needed(widest as u64);
                    buf.push(flags);
                    buf.push((dims.len() + 1) as u8);
                    buf.push(width as u8);
                    for d in dims {
                        put_uint(&mut buf, *d as u64, width);
                    }
                    put_uint(&mut buf, *element_size as u64, width);
                    buf.push(index.type_id());
                    match index {
                        ChunkIndex::SingleChunk { addr, filtered } => {
                            if let Some((size, mask)) = filtered {
                                put_uint(&mut buf, *size, length_size as usize);
                                buf.extend_from_slice(&mask.to_le_bytes());
                            }
                            put_addr(&mut buf, *addr, offset_size);
                        }
                        ChunkIndex::Implicit { addr } => put_addr(&mut buf, *addr, offset_size),
                        ChunkIndex::FixedArray { page_bits, addr } => {
                            buf.push(*page_bits);
                            put_addr(&mut buf, *addr, offset_size);
                        }
                        ChunkIndex::BTreeV1 { .. } => {}
                    }
                }
            }
            DataLayout::Virtual {
                heap_addr,
                heap_index,
            } => {
                if self.version < 4 {
                    return Err(FormatError::InvalidLayoutClass(3));
                }
                buf.push(3);
                put_addr(&mut buf, *heap_addr, offset_size);
                buf.extend_from_slice(&heap_index.to_le_bytes());
            }
        }
        Ok(buf)
    }
}

fn narrow_dim(v: u64) -> Result<u32, FormatError> {
    u32::try_from(v).map_err(|_| FormatError::InvalidField {
        what: "chunk dimension",
        value: v,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: &LayoutMessage) -> Vec<u8> {
        let bytes = msg.encode(8, 8).unwrap();
        assert_eq!(&LayoutMessage::decode(&bytes, 8, 8).unwrap(), msg);
        bytes
    }

    #[test]
    fn v3_contiguous_bytes() {
        let bytes = roundtrip(&LayoutMessage {
            version: 3,
            layout: DataLayout::Contiguous {
                addr: Some(0x800),
                size: 400,
            },
        });
        assert_eq!(bytes.len(), 2 + 8 + 8);
        assert_eq!(&bytes[..2], &[3, 1]);
    }

    #[test]
    fn v3_chunked_carries_element_size_as_last_dim() {
        let bytes = roundtrip(&LayoutMessage {
            version: 3,
            layout: DataLayout::Chunked {
                dims: vec![4, 4],
                element_size: 4,
                flags: 0,
                index: ChunkIndex::BTreeV1 { addr: None },
            },
        });
        assert_eq!(bytes[2], 3);
        assert_eq!(bytes.len(), 3 + 8 + 12);
    }

    #[test]
    fn v4_index_variants() {
        let indexes = [
            ChunkIndex::SingleChunk {
                addr: Some(96),
                filtered: None,
            },
            ChunkIndex::SingleChunk {
                addr: Some(96),
                filtered: Some((37, 0)),
            },
            ChunkIndex::Implicit { addr: Some(4096) },
            ChunkIndex::FixedArray {
                page_bits: 10,
                addr: None,
            },
        ];
        for index in indexes {
            roundtrip(&LayoutMessage {
                version: 4,
                layout: DataLayout::Chunked {
                    dims: vec![300, 2],
                    element_size: 8,
                    flags: FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS,
                    index,
                },
            });
        }
    }

    #[test]
    fn v4_dimension_width_is_minimal() {
        let msg = LayoutMessage {
            version: 4,
            layout: DataLayout::Chunked {
                dims: vec![300],
                element_size: 4,
                flags: 0,
                index: ChunkIndex::Implicit { addr: None },
            },
        };
        let bytes = msg.encode(8, 8).unwrap();
        assert_eq!(bytes[4], 2);
    }

    #[test]
    fn v3_rejects_non_btree_index() {
        let msg = LayoutMessage {
            version: 3,
            layout: DataLayout::Chunked {
                dims: vec![4],
                element_size: 4,
                flags: 0,
                index: ChunkIndex::Implicit { addr: None },
            },
        };
        assert!(msg.encode(8, 8).is_err());
    }

    #[test]
    fn compact_and_virtual() {
        roundtrip(&LayoutMessage {
            version: 3,
            layout: DataLayout::Compact {
                data: vec![1, 2, 3, 4],
            },
        });
        roundtrip(&LayoutMessage {
            version: 4,
            layout: DataLayout::Virtual {
                heap_addr: Some(0x2000),
                heap_index: 1,
            },
        });
    }

    #[test]
    fn oversized_compact_rejected() {
        let msg = LayoutMessage {
            version: 3,
            layout: DataLayout::Compact {
                data: vec![0; MAX_COMPACT_SIZE + 1],
            },
        };
        assert_eq!(
            msg.encode(8, 8),
            Err(FormatError::MessageTooLarge(MAX_COMPACT_SIZE + 1))
        );
    }

    #[test]
    fn extensible_array_is_unsupported() {
        let bytes = [4u8, 2, 0, 2, 1, 4, 4, 4];
        let err = LayoutMessage::decode(&bytes, 8, 8).unwrap_err();
        assert!(err.is_unsupported());
    }
}
