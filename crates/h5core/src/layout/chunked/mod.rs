//! Chunked layout.
//!
//! The dataset is tiled into equal chunks addressed by their scaled
//! coordinates (element offset divided by chunk size). Chunk records are
//! kept in memory while the dataset is open and written to the on-disk
//! index on flush. Decoded chunks pass through a [`ChunkCache`].

pub mod cache;
pub mod index;

use std::borrow::Cow;
use std::collections::BTreeMap;

use h5core_filters::{run_forward, run_reverse};
use h5core_format::data_layout::{ChunkIndex, DataLayout, FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS};
use h5core_format::dataspace::UNLIMITED;
use h5core_format::selection::Selection;
use tracing::{debug, trace};

use self::cache::{hash_bits, CacheEntry, ChunkCache, Scaled};
pub use self::index::{ChunkRecord, IndexKind};
use self::index::{grid_coords, Geometry, IndexState};
use super::{gather, scatter, DatasetInfo, LayoutOps};
use crate::context::IoCtx;
use crate::error::{bail, err, Component, Result, ResultExt};
use crate::props::AllocTime;
use crate::selection::{chunk_runs, copy_box};

macro_rules! geometry {
    ($s:ident, $info:expr) => {
        Geometry {
            chunk: &$s.chunk,
            chunk_u32: &$s.chunk_u32,
            max_grid: &$s.max_grid,
            grid: &$s.grid,
            chunk_bytes: $s.chunk_nelmts * $info.elem_size as u64,
            filtered: !$info.pipeline.is_empty(),
        }
    };
}

#[derive(Debug)]
pub struct ChunkedLayout {
    version: u8,
    chunk: Vec<u64>,
    chunk_u32: Vec<u32>,
    chunk_nelmts: u64,
    flags: u8,
    index: IndexState,
    /// Size and mask carried by a filtered single-chunk index message.
    single: Option<(u64, u32)>,
    records: BTreeMap<Scaled, ChunkRecord>,
    cache: Option<ChunkCache>,
    max_grid: Vec<u64>,
    grid: Vec<u64>,
    bits: Vec<u32>,
    alloc_time: AllocTime,
    allocated_all: bool,
    header_dirty: bool,
}

impl ChunkedLayout {
    pub fn new(version: u8, chunk: &[u64], dont_filter_partial_edge_chunks: bool) -> ChunkedLayout {
        ChunkedLayout {
            version,
            chunk: chunk.to_vec(),
            chunk_u32: Vec::new(),
            chunk_nelmts: 0,
            flags: if dont_filter_partial_edge_chunks {
                FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS
            } else {
                0
            },
            index: IndexState::new(IndexKind::BTree),
            single: None,
            records: BTreeMap::new(),
            cache: None,
            max_grid: Vec::new(),
            grid: Vec::new(),
            bits: Vec::new(),
            alloc_time: AllocTime::Incremental,
            allocated_all: false,
            header_dirty: false,
        }
    }

    /// State for a decoded layout message.
    pub fn from_stored(version: u8, dims: &[u32], flags: u8, index: &ChunkIndex) -> ChunkedLayout {
        let chunk: Vec<u64> = dims.iter().map(|&d| d as u64).collect();
        let single = match index {
            ChunkIndex::SingleChunk { filtered, .. } => *filtered,
            _ => None,
        };
        ChunkedLayout {
            chunk_u32: dims.to_vec(),
            flags: flags & FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS,
            index: IndexState::from_message(index),
            single,
            ..ChunkedLayout::new(version, &chunk, false)
        }
    }

    pub fn chunk_dims(&self) -> &[u64] {
        &self.chunk
    }

    pub fn dont_filter_partial_edge_chunks(&self) -> bool {
        self.flags & FLAG_DONT_FILTER_PARTIAL_EDGE_CHUNKS != 0
    }

    pub fn index_kind(&self) -> IndexKind {
        self.index.kind
    }

    /// Record of the chunk at `scaled`, if it has storage.
    pub fn record(&self, scaled: &[u64]) -> Option<ChunkRecord> {
        self.records.get(scaled).copied()
    }

    pub fn num_chunks(&self) -> usize {
        self.records.len()
    }

    /// Decoded chunks currently held by the cache.
    pub fn cached_chunks(&self) -> usize {
        self.cache.as_ref().map_or(0, ChunkCache::len)
    }

    fn chunk_bytes(&self, info: &DatasetInfo<'_>) -> usize {
        (self.chunk_nelmts * info.elem_size as u64) as usize
    }

    /// Whether the chunk extends past `dims` in any dimension.
    fn is_edge(&self, scaled: &[u64], dims: &[u64]) -> bool {
        scaled
            .iter()
            .zip(&self.chunk)
            .zip(dims)
            .any(|((&s, &c), &d)| (s + 1) * c > d)
    }

    fn grid_of(&self, dims: &[u64]) -> Vec<u64> {
        dims.iter().zip(&self.chunk).map(|(&d, &c)| d.div_ceil(c)).collect()
    }

    /// Shape-derived runtime state shared by create and open.
    fn init_runtime(&mut self, info: &DatasetInfo<'_>) -> Result<()> {
        let rank = info.dims.len();
        if self.chunk.len() != rank {
            bail!(
                BadArgs,
                "chunk rank {} differs from dataspace rank {rank}",
                self.chunk.len()
            );
        }
        if let Some(i) = self.chunk.iter().position(|&c| c == 0) {
            bail!(BadArgs, "chunk dimension {i} is zero");
        }
        self.chunk_u32 = self
            .chunk
            .iter()
            .map(|&c| u32::try_from(c).map_err(|_| err!(BadRange, "chunk dimension {c} is too large")))
            .collect::<Result<_>>()?;
        self.chunk_nelmts = self
            .chunk
            .iter()
            .try_fold(1u64, |acc, &c| acc.checked_mul(c))
            .ok_or_else(|| err!(Overflow, "chunk element count overflows"))?;
        let bytes = self
            .chunk_nelmts
            .checked_mul(info.elem_size as u64)
            .filter(|&b| b <= u32::MAX as u64)
            .ok_or_else(|| err!(BadRange, "chunks must be smaller than 4 GiB"))?;
        self.max_grid = info
            .max_dims
            .iter()
            .zip(&self.chunk)
            .map(|(&m, &c)| if m == UNLIMITED { 0 } else { m.div_ceil(c) })
            .collect();
        self.grid = self.grid_of(info.dims);
        self.bits = hash_bits(info.dims, &self.chunk);
        self.alloc_time = info.fill.alloc_time;
        let config = info.dapl.chunk_cache.unwrap_or_default();
        trace!(chunk = ?self.chunk, bytes, nslots = config.nslots, "chunk cache configured");
        self.cache = Some(ChunkCache::new(config, self.bits.clone()));
        Ok(())
    }

    /// Read and decode a chunk, or produce fill for an unallocated one.
    fn load_chunk(&self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>, scaled: &[u64]) -> Result<Vec<u8>> {
        let nbytes = self.chunk_bytes(info);
        let Some(rec) = self.records.get(scaled) else {
            return Ok(info.fill.buffer(nbytes));
        };
        let raw = ctx.read_vec(rec.addr, rec.size as usize)?;
        let data = if info.pipeline.is_empty() {
            raw
        } else {
            run_reverse(ctx.filters(), info.pipeline, rec.mask, raw).within(Component::Pipeline)?
        };
        if data.len() != nbytes {
            bail!(
                Corrupt,
                "chunk {scaled:?} decodes to {} bytes, expected {nbytes}",
                data.len()
            );
        }
        trace!(?scaled, addr = rec.addr, size = rec.size, "chunk loaded");
        Ok(data)
    }

    /// Encode a chunk and write it to its (possibly new) location.
    fn store_chunk(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        scaled: &[u64],
        data: &[u8],
    ) -> Result<()> {
        let (encoded, mask) = if info.pipeline.is_empty() {
            (Cow::Borrowed(data), 0)
        } else {
            let start = if self.dont_filter_partial_edge_chunks() && self.is_edge(scaled, info.dims) {
                info.pipeline.all_filters_mask()
            } else {
                0
            };
            let (out, mask) = run_forward(ctx.filters(), info.pipeline, start, data.to_vec())
                .within(Component::Pipeline)?;
            (Cow::Owned(out), mask)
        };
        let size = encoded.len() as u64;
        let addr = match self.records.get(scaled).copied() {
            Some(rec) if self.index.is_implicit() || rec.size == size => rec.addr,
            Some(rec) => ctx.realloc(rec.addr, rec.size, size)?,
            None if self.index.is_implicit() => {
                self.index.allocate_implicit(ctx, &geometry!(self, info))?;
                self.index
                    .implicit_addr(&geometry!(self, info), scaled)
                    .ok_or_else(|| err!(AddrUndefined, "implicit chunk block is not allocated"))?
            }
            None => ctx.alloc(size)?,
        };
        ctx.write(addr, &encoded)?;
        let rec = ChunkRecord { addr, size, mask };
        if self.records.insert(scaled.to_vec(), rec) != Some(rec) {
            self.index.dirty = true;
        }
        trace!(?scaled, addr, size, mask, "chunk stored");
        Ok(())
    }

    fn write_evicted(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        evicted: Vec<(Scaled, CacheEntry)>,
    ) -> Result<()> {
        for (scaled, entry) in evicted {
            if entry.dirty {
                self.store_chunk(info, ctx, &scaled, &entry.data)?;
            }
        }
        Ok(())
    }

    /// Hand a decoded chunk to the cache, or write it out directly when the
    /// cache will not take it.
    fn cache_chunk(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        scaled: Scaled,
        data: Vec<u8>,
        touched: u64,
        dirty: bool,
    ) -> Result<()> {
        let nelmts = self.chunk_nelmts;
        let admitted = self.cache.as_ref().is_some_and(|c| c.admits(data.len()));
        if !admitted {
            if dirty {
                self.store_chunk(info, ctx, &scaled, &data)?;
            }
            return Ok(());
        }
        let evicted = match &mut self.cache {
            Some(cache) => {
                let evicted = cache.insert(scaled.clone(), data, nelmts, dirty);
                cache.touch(&scaled, touched);
                evicted
            }
            None => Vec::new(),
        };
        self.write_evicted(info, ctx, evicted)
    }

    /// Replace the part of a chunk outside `dims` with fill.
    fn clip_chunk(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>, scaled: &[u64]) -> Result<()> {
        let limit: Vec<u64> = scaled
            .iter()
            .zip(&self.chunk)
            .zip(info.dims)
            .map(|((&s, &c), &d)| d.saturating_sub(s * c).min(c))
            .collect();
        let nbytes = self.chunk_bytes(info);
        let elem = info.elem_size;
        if let Some(entry) = self.cache.as_mut().and_then(|c| c.touch(scaled, 0)) {
            let mut fresh = info.fill.buffer(nbytes);
            copy_box(&entry.data, &mut fresh, &self.chunk, &limit, elem);
            entry.data = fresh;
            entry.dirty = true;
            return Ok(());
        }
        if self.records.contains_key(scaled) {
            let data = self.load_chunk(info, ctx, scaled)?;
            let mut fresh = info.fill.buffer(nbytes);
            copy_box(&data, &mut fresh, &self.chunk, &limit, elem);
            self.store_chunk(info, ctx, scaled, &fresh)?;
        }
        Ok(())
    }
}

impl LayoutOps for ChunkedLayout {
    fn construct(&mut self, info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        if info.dims.is_empty() {
            bail!(BadLayout, "chunked storage needs a simple dataspace");
        }
        if self.chunk.len() == info.max_dims.len() {
            for (i, (&c, &m)) in self.chunk.iter().zip(info.max_dims).enumerate() {
                if m != UNLIMITED && c > m {
                    bail!(
                        BadRange,
                        "chunk dimension {i} ({c}) exceeds the maximum dimension ({m})"
                    );
                }
            }
        }
        self.init_runtime(info)?;
        // Only the version 4 message can record the edge-chunk policy.
        if self.dont_filter_partial_edge_chunks() {
            self.version = self.version.max(4);
        }
        let early = self.alloc_time == AllocTime::Early;
        let (version, kind) = IndexKind::choose(
            self.version,
            info.max_dims,
            &self.chunk,
            early,
            !info.pipeline.is_empty(),
        );
        debug!(?kind, version, chunk = ?self.chunk, "chunked layout constructed");
        self.version = version;
        self.index = IndexState::new(kind);
        self.header_dirty = true;
        Ok(())
    }

    fn is_space_allocated(&self) -> bool {
        self.alloc_time == AllocTime::Incremental || self.allocated_all
    }

    fn is_data_cached(&self) -> bool {
        self.cache.as_ref().is_some_and(ChunkCache::has_dirty)
    }

    fn read_oh(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        if info.dims.is_empty() {
            bail!(Corrupt, "chunked layout on a dataspace without dimensions");
        }
        self.init_runtime(info)?;
        self.records = self.index.load(ctx, &geometry!(self, info), self.single)?;
        self.allocated_all = grid_coords(&self.grid).all(|s| self.records.contains_key(&s));
        Ok(())
    }

    fn io_init(&self, info: &DatasetInfo<'_>, _sel: &Selection) -> Result<()> {
        if self.chunk.len() != info.dims.len() {
            bail!(BadLayout, "chunk rank does not match the dataspace");
        }
        Ok(())
    }

    fn read(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &mut [u8],
    ) -> Result<()> {
        let elem = info.elem_size;
        let per_chunk = chunk_runs(sel, info.dims, &self.chunk);
        let single = per_chunk.len() == 1;
        for (scaled, runs) in per_chunk {
            let touched: u64 = runs.iter().map(|r| r.len).sum();
            if let Some(entry) = self.cache.as_mut().and_then(|c| c.touch(&scaled, touched)) {
                gather(&runs, &entry.data, buf, elem);
                continue;
            }
            let data = self.load_chunk(info, ctx, &scaled)?;
            gather(&runs, &data, buf, elem);
            if single && touched == self.chunk_nelmts {
                // Whole-chunk I/O bypasses the cache.
                continue;
            }
            self.cache_chunk(info, ctx, scaled, data, touched, false)?;
        }
        Ok(())
    }

    fn write(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &[u8],
    ) -> Result<()> {
        let elem = info.elem_size;
        let per_chunk = chunk_runs(sel, info.dims, &self.chunk);
        let single = per_chunk.len() == 1;
        for (scaled, runs) in per_chunk {
            let touched: u64 = runs.iter().map(|r| r.len).sum();
            if let Some(entry) = self.cache.as_mut().and_then(|c| c.touch(&scaled, touched)) {
                scatter(&runs, buf, &mut entry.data, elem);
                entry.dirty = true;
                continue;
            }
            // Points may repeat, so only a hyperslab can cover a chunk alone.
            let whole = touched == self.chunk_nelmts && !matches!(sel, Selection::Points(_));
            let mut data = if whole {
                vec![0u8; self.chunk_bytes(info)]
            } else {
                self.load_chunk(info, ctx, &scaled)?
            };
            scatter(&runs, buf, &mut data, elem);
            if single && whole {
                self.store_chunk(info, ctx, &scaled, &data)?;
                continue;
            }
            self.cache_chunk(info, ctx, scaled, data, touched, true)?;
        }
        Ok(())
    }

    fn flush(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        if let Some(mut cache) = self.cache.take() {
            let mut result: Result<()> = Ok(());
            for (scaled, entry) in cache.dirty_mut() {
                if let Err(e) = self.store_chunk(info, ctx, scaled, &entry.data) {
                    result = Err(e);
                    break;
                }
                entry.dirty = false;
            }
            self.cache = Some(cache);
            result?;
        }
        if self.index.dirty {
            self.index.store(ctx, &geometry!(self, info), &self.records)?;
            self.header_dirty = true;
        }
        Ok(())
    }

    fn destroy(&mut self) {
        if let Some(cache) = &mut self.cache {
            cache.drain();
        }
    }

    fn allocate(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        full_overwrite: bool,
    ) -> Result<()> {
        if self.allocated_all {
            return Ok(());
        }
        let nbytes = self.chunk_bytes(info);
        // Filtered chunks are always written so they decode.
        let fill = (!info.pipeline.is_empty() || (info.fill.write_on_alloc() && !full_overwrite))
            .then(|| info.fill.buffer(nbytes));
        if self.index.is_implicit() {
            self.index.allocate_implicit(ctx, &geometry!(self, info))?;
        }
        let missing: Vec<Scaled> = grid_coords(&self.grid)
            .filter(|s| !self.records.contains_key(s))
            .collect();
        debug!(chunks = missing.len(), "allocating chunks");
        for scaled in missing {
            match &fill {
                Some(buf) => self.store_chunk(info, ctx, &scaled, buf)?,
                None => {
                    let addr = if self.index.is_implicit() {
                        self.index
                            .implicit_addr(&geometry!(self, info), &scaled)
                            .ok_or_else(|| err!(AddrUndefined, "implicit chunk block is not allocated"))?
                    } else {
                        ctx.alloc(nbytes as u64)?
                    };
                    self.records.insert(
                        scaled,
                        ChunkRecord {
                            addr,
                            size: nbytes as u64,
                            mask: 0,
                        },
                    );
                    self.index.dirty = true;
                }
            }
        }
        self.allocated_all = true;
        Ok(())
    }

    fn set_extent(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        old_dims: &[u64],
    ) -> Result<()> {
        self.grid = self.grid_of(info.dims);
        let bits = hash_bits(info.dims, &self.chunk);
        if bits != self.bits {
            self.bits = bits.clone();
            let evicted = match &mut self.cache {
                Some(cache) => cache.rehash(bits),
                None => Vec::new(),
            };
            self.write_evicted(info, ctx, evicted)?;
        }

        let shrunk: Vec<bool> = info.dims.iter().zip(old_dims).map(|(n, o)| n < o).collect();
        if shrunk.iter().any(|&s| s) {
            let chunk = self.chunk.clone();
            let dims = info.dims.to_vec();
            let outside = move |s: &[u64]| s.iter().zip(&chunk).zip(&dims).any(|((s, c), d)| s * c >= *d);
            if let Some(cache) = &mut self.cache {
                cache.drain_where(&outside);
            }
            let gone: Vec<Scaled> = self.records.keys().filter(|s| outside(s.as_slice())).cloned().collect();
            for scaled in gone {
                if let Some(rec) = self.records.remove(&scaled) {
                    if !self.index.is_implicit() {
                        ctx.free(rec.addr, rec.size)?;
                    }
                    self.index.dirty = true;
                }
            }
            // Chunks cut by the new boundary get fill past it.
            let chunk = &self.chunk;
            let cut = |s: &[u64]| {
                s.iter()
                    .zip(chunk)
                    .zip(info.dims)
                    .zip(&shrunk)
                    .any(|(((s, c), d), &shr)| shr && (s + 1) * c > *d)
            };
            let mut straddling: Vec<Scaled> = self.records.keys().filter(|s| cut(s.as_slice())).cloned().collect();
            if let Some(cache) = &self.cache {
                for s in grid_coords(&self.grid).filter(|s| cut(s.as_slice()) && cache.contains(s)) {
                    if !straddling.contains(&s) {
                        straddling.push(s);
                    }
                }
            }
            for scaled in straddling {
                self.clip_chunk(info, ctx, &scaled)?;
            }
        }

        // Former edge chunks that are now interior get their filters.
        if self.dont_filter_partial_edge_chunks() && !info.pipeline.is_empty() {
            let refilter: Vec<Scaled> = self
                .records
                .iter()
                .filter(|(s, r)| r.mask != 0 && self.is_edge(s, old_dims) && !self.is_edge(s, info.dims))
                .map(|(s, _)| s.clone())
                .collect();
            for scaled in refilter {
                if let Some(entry) = self.cache.as_mut().and_then(|c| c.touch(&scaled, 0)) {
                    entry.dirty = true;
                    continue;
                }
                let data = self.load_chunk(info, ctx, &scaled)?;
                self.store_chunk(info, ctx, &scaled, &data)?;
            }
        }

        if info.dims.iter().zip(old_dims).any(|(n, o)| n > o) {
            self.allocated_all = false;
            if self.alloc_time == AllocTime::Early {
                self.allocate(info, ctx, false)?;
            }
        }
        self.header_dirty = true;
        Ok(())
    }

    fn free_storage(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        if let Some(cache) = &mut self.cache {
            cache.drain();
        }
        if !self.index.is_implicit() {
            for rec in self.records.values() {
                ctx.free(rec.addr, rec.size)?;
            }
        }
        self.records.clear();
        self.index.free(ctx)?;
        self.allocated_all = false;
        Ok(())
    }

    fn storage_size(&self) -> u64 {
        self.records.values().map(|r| r.size).sum()
    }

    fn message(&self, info: &DatasetInfo<'_>) -> (u8, DataLayout) {
        (
            self.version,
            DataLayout::Chunked {
                dims: self.chunk_u32.clone(),
                element_size: info.elem_size as u32,
                flags: self.flags,
                index: self
                    .index
                    .to_message(&self.records, !info.pipeline.is_empty()),
            },
        )
    }

    fn take_header_dirty(&mut self) -> bool {
        std::mem::take(&mut self.header_dirty)
    }
}
