//! On-disk chunk indexes.
//!
//! While a dataset is open its chunk records live in a `BTreeMap` owned by
//! the layout. The structures here translate that map to and from the file:
//! a version 1 B-tree, a fixed array, the implicit index, or the single
//! chunk stored directly in the layout message.

use std::collections::BTreeMap;

use h5core_format::btree_v1::{self, ChunkEntry, ChunkKey};
use h5core_format::data_layout::ChunkIndex;
use h5core_format::fixed_array::{self, FixedArrayEntry, FixedArrayHeader};
use h5core_format::{LENGTH_SIZE, OFFSET_SIZE};
use tracing::{debug, trace};

use super::cache::Scaled;
use crate::context::IoCtx;
use crate::error::{bail, err, Component, Result, ResultExt};
use crate::selection::{strides, unravel};

/// Where a chunk lives and how it was filtered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRecord {
    pub addr: u64,
    /// Stored (filtered) size in bytes.
    pub size: u64,
    pub mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    BTree,
    Single,
    Implicit,
    FixedArray,
}

impl IndexKind {
    /// Pick the index for a new dataset. Returns the layout message version
    /// to write with it; version 4 falls back to 3 when a dimension is
    /// unlimited since only the B-tree handles unbounded grids here.
    pub fn choose(
        version: u8,
        max_dims: &[u64],
        chunk: &[u64],
        early: bool,
        filtered: bool,
    ) -> (u8, IndexKind) {
        if version < 4 || max_dims.iter().any(|&d| d == h5core_format::dataspace::UNLIMITED) {
            return (3, IndexKind::BTree);
        }
        if max_dims == chunk {
            (version, IndexKind::Single)
        } else if early && !filtered {
            (version, IndexKind::Implicit)
        } else {
            (version, IndexKind::FixedArray)
        }
    }
}

/// Shape information the index needs.
#[derive(Debug, Clone, Copy)]
pub struct Geometry<'a> {
    pub chunk: &'a [u64],
    pub chunk_u32: &'a [u32],
    /// Chunks per dimension over the maximum extent (fixed extents only).
    pub max_grid: &'a [u64],
    /// Chunks per dimension over the current extent.
    pub grid: &'a [u64],
    pub chunk_bytes: u64,
    pub filtered: bool,
}

impl Geometry<'_> {
    fn linear(&self, scaled: &[u64]) -> u64 {
        scaled
            .iter()
            .zip(strides(self.max_grid))
            .map(|(s, st)| s * st)
            .sum()
    }

    fn max_chunks(&self) -> u64 {
        self.max_grid.iter().product()
    }
}

/// Every chunk coordinate of `grid`, in row-major order.
pub fn grid_coords(grid: &[u64]) -> impl Iterator<Item = Scaled> + '_ {
    let total: u64 = grid.iter().product();
    (0..total).map(move |i| unravel(i, grid))
}

#[derive(Debug, Clone)]
pub struct IndexState {
    pub kind: IndexKind,
    /// Tree root, fixed array header, implicit base or the single chunk.
    pub addr: Option<u64>,
    pub page_bits: u8,
    /// File space owned by the index structure itself.
    extent: Option<(u64, u64)>,
    /// Records changed since the structure was last written.
    pub dirty: bool,
}

impl IndexState {
    pub fn new(kind: IndexKind) -> IndexState {
        IndexState {
            kind,
            addr: None,
            page_bits: 0,
            extent: None,
            dirty: false,
        }
    }

    pub fn from_message(index: &ChunkIndex) -> IndexState {
        let (kind, page_bits) = match index {
            ChunkIndex::BTreeV1 { .. } => (IndexKind::BTree, 0),
            ChunkIndex::SingleChunk { .. } => (IndexKind::Single, 0),
            ChunkIndex::Implicit { .. } => (IndexKind::Implicit, 0),
            ChunkIndex::FixedArray { page_bits, .. } => (IndexKind::FixedArray, *page_bits),
        };
        IndexState {
            addr: index.addr(),
            page_bits,
            ..IndexState::new(kind)
        }
    }

    pub fn to_message(&self, records: &BTreeMap<Scaled, ChunkRecord>, filtered: bool) -> ChunkIndex {
        match self.kind {
            IndexKind::BTree => ChunkIndex::BTreeV1 { addr: self.addr },
            IndexKind::Single => {
                let rec = records.values().next();
                ChunkIndex::SingleChunk {
                    addr: rec.map(|r| r.addr),
                    filtered: filtered.then(|| rec.map_or((0, 0), |r| (r.size, r.mask))),
                }
            }
            IndexKind::Implicit => ChunkIndex::Implicit { addr: self.addr },
            IndexKind::FixedArray => ChunkIndex::FixedArray {
                page_bits: self.page_bits,
                addr: self.addr,
            },
        }
    }

    /// Whether chunk storage is owned by one implicit block rather than
    /// allocated per chunk.
    pub fn is_implicit(&self) -> bool {
        self.kind == IndexKind::Implicit
    }

    /// Address of a chunk under the implicit index.
    pub fn implicit_addr(&self, geo: &Geometry<'_>, scaled: &[u64]) -> Option<u64> {
        let base = self.addr?;
        Some(base + geo.linear(scaled) * geo.chunk_bytes)
    }

    /// Reserve the implicit block covering the whole maximum grid.
    pub fn allocate_implicit(&mut self, ctx: &IoCtx<'_>, geo: &Geometry<'_>) -> Result<u64> {
        if let Some(addr) = self.addr {
            return Ok(addr);
        }
        let size = geo
            .max_chunks()
            .checked_mul(geo.chunk_bytes)
            .ok_or_else(|| err!(Overflow, "implicit chunk block size overflows"))?;
        let addr = ctx.alloc(size)?;
        debug!(addr, size, "implicit chunk block allocated");
        self.addr = Some(addr);
        self.extent = Some((addr, size));
        Ok(addr)
    }

    /// Read every record of the on-disk index.
    pub fn load(
        &mut self,
        ctx: &IoCtx<'_>,
        geo: &Geometry<'_>,
        single: Option<(u64, u32)>,
    ) -> Result<BTreeMap<Scaled, ChunkRecord>> {
        let mut records = BTreeMap::new();
        let Some(addr) = self.addr else {
            return Ok(records);
        };
        let rank = geo.chunk.len();
        match self.kind {
            IndexKind::BTree => {
                let entries = btree_v1::collect_chunk_entries(addr, rank, OFFSET_SIZE, |a, len| {
                    ctx.read_vec(a, len)
                })
                .within(Component::Layout)?;
                for e in &entries {
                    if e.key.offsets.len() != rank {
                        bail!(Corrupt, "chunk key has rank {}", e.key.offsets.len());
                    }
                    let scaled: Scaled = e.key.offsets.iter().zip(geo.chunk).map(|(o, c)| o / c).collect();
                    records.insert(
                        scaled,
                        ChunkRecord {
                            addr: e.addr,
                            size: e.key.size as u64,
                            mask: e.key.filter_mask,
                        },
                    );
                }
                // The root is written last, so the tree starts one tree-size
                // before the end of the root node.
                let total = btree_v1::tree_size(entries.len(), rank, OFFSET_SIZE) as u64;
                let node = btree_v1::node_size(rank, OFFSET_SIZE) as u64;
                self.extent = (addr + node)
                    .checked_sub(total)
                    .filter(|_| total > 0)
                    .map(|base| (base, total));
            }
            IndexKind::Single => {
                let (size, mask) = single.unwrap_or((geo.chunk_bytes, 0));
                records.insert(vec![0; rank], ChunkRecord { addr, size, mask });
            }
            IndexKind::Implicit => {
                self.extent = Some((addr, geo.max_chunks() * geo.chunk_bytes));
                for scaled in grid_coords(geo.grid) {
                    let chunk_addr = addr + geo.linear(&scaled) * geo.chunk_bytes;
                    records.insert(
                        scaled,
                        ChunkRecord {
                            addr: chunk_addr,
                            size: geo.chunk_bytes,
                            mask: 0,
                        },
                    );
                }
            }
            IndexKind::FixedArray => {
                let hsize = FixedArrayHeader::encoded_size(OFFSET_SIZE, LENGTH_SIZE);
                let header = FixedArrayHeader::decode(&ctx.read_vec(addr, hsize)?, OFFSET_SIZE, LENGTH_SIZE)
                    .within(Component::Layout)?;
                let Some(block_addr) = header.data_block_addr else {
                    return Ok(records);
                };
                let bsize = header.data_block_size(OFFSET_SIZE).within(Component::Layout)?;
                let entries = header
                    .decode_data_block(&ctx.read_vec(block_addr, bsize)?, OFFSET_SIZE)
                    .within(Component::Layout)?;
                for (i, e) in entries.iter().enumerate() {
                    let Some(chunk_addr) = e.addr else { continue };
                    let size = if header.filtered { e.size } else { geo.chunk_bytes };
                    records.insert(
                        unravel(i as u64, geo.max_grid),
                        ChunkRecord {
                            addr: chunk_addr,
                            size,
                            mask: e.filter_mask,
                        },
                    );
                }
                self.extent = Some((addr, (hsize + bsize) as u64));
            }
        }
        trace!(kind = ?self.kind, n = records.len(), "chunk index loaded");
        Ok(records)
    }

    /// Write the index for `records`, replacing the previous structure.
    pub fn store(
        &mut self,
        ctx: &IoCtx<'_>,
        geo: &Geometry<'_>,
        records: &BTreeMap<Scaled, ChunkRecord>,
    ) -> Result<()> {
        match self.kind {
            IndexKind::Single => {
                self.addr = records.values().next().map(|r| r.addr);
            }
            IndexKind::Implicit => {}
            IndexKind::BTree => {
                self.free(ctx)?;
                let mut entries = Vec::with_capacity(records.len());
                for (scaled, r) in records {
                    let size = u32::try_from(r.size)
                        .map_err(|_| err!(Overflow, "chunk of {} bytes exceeds the B-tree key", r.size))?;
                    entries.push(ChunkEntry {
                        key: ChunkKey {
                            size,
                            filter_mask: r.mask,
                            offsets: scaled.iter().zip(geo.chunk).map(|(s, c)| s * c).collect(),
                        },
                        addr: r.addr,
                    });
                }
                let total = btree_v1::tree_size(entries.len(), geo.chunk.len(), OFFSET_SIZE) as u64;
                if total == 0 {
                    self.addr = None;
                } else {
                    let base = ctx.alloc(total)?;
                    let (bytes, root) = btree_v1::build_chunk_tree(&entries, geo.chunk_u32, base, OFFSET_SIZE);
                    ctx.write(base, &bytes)?;
                    self.addr = root;
                    self.extent = Some((base, total));
                }
            }
            IndexKind::FixedArray => {
                self.free(ctx)?;
                let n = geo.max_chunks() as usize;
                let mut entries = vec![FixedArrayEntry::default(); n];
                for (scaled, r) in records {
                    let i = geo.linear(scaled) as usize;
                    if let Some(slot) = entries.get_mut(i) {
                        *slot = FixedArrayEntry {
                            addr: Some(r.addr),
                            size: r.size,
                            filter_mask: r.mask,
                        };
                    }
                }
                let total = fixed_array::fixed_array_size(n, geo.filtered, geo.chunk_bytes, OFFSET_SIZE, LENGTH_SIZE) as u64;
                let base = ctx.alloc(total)?;
                let (bytes, page_bits) =
                    fixed_array::build_fixed_array(&entries, geo.filtered, geo.chunk_bytes, base, OFFSET_SIZE, LENGTH_SIZE);
                ctx.write(base, &bytes)?;
                self.addr = Some(base);
                self.page_bits = page_bits;
                self.extent = Some((base, total));
            }
        }
        self.dirty = false;
        trace!(kind = ?self.kind, n = records.len(), addr = ?self.addr, "chunk index written");
        Ok(())
    }

    /// Release the index structure. For the implicit index this is the
    /// block holding every chunk.
    pub fn free(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        self.addr = None;
        if let Some((addr, size)) = self.extent.take() {
            ctx.free(addr, size)?;
        }
        Ok(())
    }
}
