//! State shared by every handle to one open dataset.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use h5core_filters::{prepare, FilterContext};
use h5core_format::data_layout::{DataLayout, LayoutMessage};
use h5core_format::dataspace::{Dataspace, DataspaceKind, MAX_RANK, UNLIMITED};
use h5core_format::datatype::Datatype;
use h5core_format::external_file_list::ExternalFileListMessage;
use h5core_format::filter_pipeline::FilterPipelineMessage;
use h5core_format::object_header::RawMessage;
use h5core_format::selection::Selection;
use h5core_format::vds::SAME_FILE;
use h5core_io::DriverFeatures;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::header::{self, DatasetMessages};
use crate::config::{expand_origin, LibVer};
use crate::context::IoCtx;
use crate::error::{bail, err, Component, Error, Result, ResultExt};
use crate::file::{normalize_name, FileShared};
use crate::fill::FillValue;
use crate::header::ObjectHeader;
use crate::layout::efl::ExternalStorage;
use crate::layout::{
    ChunkedLayout, CompactLayout, ContiguousLayout, DatasetInfo, Layout, LayoutOps, VirtualLayout,
};
use crate::props::{AllocTime, DatasetAccessProps, DatasetCreateProps, LayoutKind};
use crate::selection::{num_elements, validate};
use crate::types::BoundType;

/// Search prefixes for external raw-data files and virtual sources, with
/// `${ORIGIN}` already expanded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Prefixes {
    pub efile: Option<PathBuf>,
    pub vds: Option<PathBuf>,
}

impl Prefixes {
    /// Access properties win over the library configuration.
    pub fn resolve(file: &FileShared, dapl: &DatasetAccessProps) -> Prefixes {
        let config = file.lib().config();
        let expand = |p: Option<&String>| p.map(|p| expand_origin(p, file.path()));
        Prefixes {
            efile: expand(dapl.efile_prefix.as_ref().or(config.efile_prefix.as_ref())),
            vds: expand(dapl.vds_prefix.as_ref().or(config.vds_prefix.as_ref())),
        }
    }
}

/// Arguments of a dataset creation.
pub(crate) struct Creation<'a> {
    pub name: &'a str,
    pub dtype: &'a Datatype,
    pub space: &'a Dataspace,
    pub dcpl: &'a DatasetCreateProps,
    pub dapl: &'a DatasetAccessProps,
    pub prefixes: Prefixes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    /// The last handle is being released.
    Closing,
    Closed,
}

#[derive(Debug)]
pub(crate) struct DatasetState {
    phase: Phase,
    pub(super) name: String,
    pub(super) dtype: BoundType,
    pub(super) space: Dataspace,
    fill: FillValue,
    pipeline: FilterPipelineMessage,
    pub(super) layout: Layout,
    efl: Option<ExternalFileListMessage>,
    dapl: DatasetAccessProps,
    prefixes: Prefixes,
    libver: LibVer,
    header: Option<ObjectHeader>,
    header_dirty: bool,
    mtime: Option<u32>,
    minimized: bool,
    sieve_buf_size: usize,
}

/// The per-dataset record held by the registry.
#[derive(Debug)]
pub(crate) struct DatasetShared {
    file: Arc<FileShared>,
    addr: u64,
    state: Mutex<DatasetState>,
}

fn now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
}

fn check_datatype(dtype: &Datatype) -> Result<()> {
    if let Err(msg) = dtype.validate() {
        bail!(BadType, "invalid datatype: {msg}");
    }
    if dtype.size() == 0 {
        bail!(BadType, "datatype has zero size");
    }
    Ok(())
}

fn check_dataspace(space: &Dataspace) -> Result<()> {
    if space.kind == DataspaceKind::Null {
        bail!(BadArgs, "datasets cannot be created with a null dataspace");
    }
    if space.rank() > MAX_RANK {
        bail!(BadArgs, "rank {} exceeds the maximum of {MAX_RANK}", space.rank());
    }
    if space.dims.len() != space.max_dims.len() {
        bail!(BadArgs, "dataspace has {} dimensions but {} maxima", space.dims.len(), space.max_dims.len());
    }
    for (i, (&d, &m)) in space.dims.iter().zip(&space.max_dims).enumerate() {
        if m != UNLIMITED && d > m {
            bail!(BadArgs, "dimension {i} ({d}) exceeds its maximum ({m})");
        }
    }
    Ok(())
}

fn check_props(dcpl: &DatasetCreateProps, space: &Dataspace) -> Result<()> {
    if !dcpl.filters.is_empty() && dcpl.layout != LayoutKind::Chunked {
        bail!(BadLayout, "filters need chunked storage");
    }
    if !dcpl.external_files.is_empty() && dcpl.layout != LayoutKind::Contiguous {
        bail!(BadLayout, "external files need contiguous storage");
    }
    if !dcpl.virtual_mappings.is_empty() && dcpl.layout != LayoutKind::Virtual {
        bail!(BadLayout, "virtual mappings need virtual storage");
    }
    match dcpl.layout {
        LayoutKind::Compact => {
            if !matches!(dcpl.alloc_time, AllocTime::Default | AllocTime::Early) {
                bail!(BadArgs, "compact storage is always allocated early");
            }
            if space.dims != space.max_dims {
                bail!(BadLayout, "compact datasets cannot be extendible");
            }
        }
        LayoutKind::Chunked => {
            let Some(chunk) = &dcpl.chunk_dims else {
                bail!(BadArgs, "chunked storage needs chunk dimensions");
            };
            if chunk.len() != space.rank() {
                bail!(BadArgs, "chunk rank {} differs from dataspace rank {}", chunk.len(), space.rank());
            }
            if let Some(i) = chunk.iter().position(|&c| c == 0) {
                bail!(BadArgs, "chunk dimension {i} is zero");
            }
            if let Some(&c) = chunk.iter().find(|&&c| c > u64::from(u32::MAX)) {
                bail!(BadRange, "chunk dimension {c} is too large");
            }
        }
        LayoutKind::Contiguous | LayoutKind::Virtual => {}
    }
    Ok(())
}

/// Append flushing only applies to chunked datasets; boundaries must name
/// dimensions that can grow.
fn check_append_flush(dapl: &DatasetAccessProps, space: &Dataspace, kind: LayoutKind) -> Result<()> {
    let Some(af) = &dapl.append_flush else {
        return Ok(());
    };
    if kind != LayoutKind::Chunked {
        return Ok(());
    }
    if af.boundary.len() != space.rank() {
        bail!(
            BadArgs,
            "append flush has {} boundaries for a rank {} dataset",
            af.boundary.len(),
            space.rank()
        );
    }
    for (i, &b) in af.boundary.iter().enumerate() {
        let fixed = space.max_dims[i] != UNLIMITED && space.max_dims[i] == space.dims[i];
        if b > 0 && fixed {
            bail!(BadArgs, "append flush boundary on dimension {i}, which cannot grow");
        }
    }
    Ok(())
}

/// Layout state for a decoded layout message.
fn stored_layout(
    ctx: &IoCtx<'_>,
    msg: LayoutMessage,
    efl: Option<&ExternalFileListMessage>,
    space: &Dataspace,
    dapl: &DatasetAccessProps,
    prefixes: &Prefixes,
    sieve_buf_size: usize,
) -> Result<Layout> {
    let version = msg.version;
    Ok(match msg.layout {
        DataLayout::Compact { data } => Layout::Compact(CompactLayout::from_stored(version, data)),
        DataLayout::Contiguous { addr, size } => {
            let efl = match efl {
                Some(m) => Some(ExternalStorage::load(ctx, m, prefixes.efile.clone())?),
                None => None,
            };
            Layout::Contiguous(ContiguousLayout::from_stored(version, addr, size, efl, sieve_buf_size))
        }
        DataLayout::Chunked {
            dims, flags, index, ..
        } => {
            if dims.len() != space.rank() {
                bail!(
                    Corrupt,
                    "layout has {} chunk dimensions for a rank {} dataspace",
                    dims.len(),
                    space.rank()
                );
            }
            Layout::Chunked(ChunkedLayout::from_stored(version, &dims, flags, &index))
        }
        DataLayout::Virtual {
            heap_addr,
            heap_index,
        } => Layout::Virtual(VirtualLayout::from_stored(
            heap_addr,
            heap_index,
            prefixes.vds.clone(),
            dapl.vds_view,
        )?),
    })
}

impl DatasetState {
    fn info(&self) -> DatasetInfo<'_> {
        DatasetInfo {
            dtype: self.dtype.datatype(),
            elem_size: self.dtype.size(),
            dims: &self.space.dims,
            max_dims: &self.space.max_dims,
            npoints: self.npoints(),
            fill: &self.fill,
            pipeline: &self.pipeline,
            dapl: &self.dapl,
            sieve_buf_size: self.sieve_buf_size,
        }
    }

    /// The layout, mutably, next to a view of everything else.
    fn parts(&mut self) -> (&mut Layout, DatasetInfo<'_>) {
        let npoints = self.npoints();
        let info = DatasetInfo {
            dtype: self.dtype.datatype(),
            elem_size: self.dtype.size(),
            dims: &self.space.dims,
            max_dims: &self.space.max_dims,
            npoints,
            fill: &self.fill,
            pipeline: &self.pipeline,
            dapl: &self.dapl,
            sieve_buf_size: self.sieve_buf_size,
        };
        (&mut self.layout, info)
    }

    fn npoints(&self) -> u64 {
        match self.space.kind {
            DataspaceKind::Null => 0,
            _ => self.space.num_elements(),
        }
    }

    pub(super) fn elem_size(&self) -> usize {
        self.dtype.size()
    }

    fn header_version(&self) -> u8 {
        self.header
            .as_ref()
            .map_or(self.libver.object_header_version(), |h| h.version)
    }

    fn messages(&self) -> Result<Vec<RawMessage>> {
        let (version, layout) = self.layout.message(&self.info());
        let msgs = DatasetMessages {
            space: self.space.clone(),
            dtype: self.dtype.datatype().clone(),
            fill: self.fill.clone(),
            pipeline: self.pipeline.clone(),
            efl: self.efl.clone(),
            layout: LayoutMessage { version, layout },
            mtime: self.mtime,
        };
        header::encode(&msgs, self.libver, self.header_version())
    }

    /// Rewrite the header if it or the layout message changed.
    fn write_header(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        self.header_dirty |= self.layout.take_header_dirty();
        if !self.header_dirty {
            return Ok(());
        }
        let msgs = self.messages()?;
        if let Some(header) = self.header.as_mut() {
            ctx.with_io(|io| header.rewrite(io, &msgs))?;
            trace!(name = %self.name, addr = header.addr, "dataset header written");
        }
        self.header_dirty = false;
        Ok(())
    }

    /// Construct storage, write the header and link the name.
    fn build(&mut self, ctx: &IoCtx<'_>, minimize: bool) -> Result<()> {
        {
            let (layout, info) = self.parts();
            layout.construct(&info, ctx)?;
            if info.fill.alloc_time == AllocTime::Early {
                layout.allocate(&info, ctx, false)?;
            }
            layout.flush(&info, ctx)?;
        }
        if let Layout::Contiguous(c) = &mut self.layout {
            if let Some(storage) = c.external_mut() {
                self.efl = Some(storage.message(ctx)?);
            }
        }
        self.layout.take_header_dirty();
        let version = self.libver.object_header_version();
        let msgs = self.messages()?;
        let header = ctx.with_io(|io| ObjectHeader::create(io, version, &msgs, minimize))?;
        let addr = header.addr;
        self.header = Some(header);
        ctx.file().link(&self.name, addr)
    }

    /// Return whatever a failed `build` allocated.
    fn discard(&mut self, ctx: &IoCtx<'_>) {
        if let Err(e) = self.layout.free_storage(ctx) {
            warn!(name = %self.name, error = %e, "releasing storage of a failed dataset failed");
        }
        self.layout.destroy();
        if let Some(header) = self.header.take() {
            if let Err(e) = ctx.with_io(|io| header.free(io)) {
                warn!(name = %self.name, error = %e, "releasing header of a failed dataset failed");
            }
        }
    }

    pub(super) fn flush(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        let (layout, info) = self.parts();
        layout.flush(&info, ctx)?;
        if ctx.writable() {
            self.write_header(ctx)?;
            ctx.with_io(|io| io.flush_driver())?;
        }
        Ok(())
    }

    /// Elements `sel` picks from the current extent.
    pub(super) fn selected(&self, sel: &Selection) -> Result<u64> {
        if self.space.kind == DataspaceKind::Null {
            return Ok(0);
        }
        validate(sel, &self.space.dims)?;
        Ok(num_elements(sel, &self.space.dims))
    }

    fn check_buffer(&self, selected: u64, len: usize) -> Result<()> {
        let expected = selected
            .checked_mul(self.elem_size() as u64)
            .ok_or_else(|| err!(Overflow, "selection size overflows"))?;
        if expected != len as u64 {
            bail!(BadArgs, "buffer holds {len} bytes, the selection needs {expected}");
        }
        Ok(())
    }

    pub(super) fn read(&mut self, ctx: &IoCtx<'_>, sel: &Selection, buf: &mut [u8]) -> Result<()> {
        let n = self.selected(sel)?;
        self.check_buffer(n, buf.len())?;
        if n == 0 {
            return Ok(());
        }
        let (layout, info) = self.parts();
        layout.io_init(&info, sel)?;
        layout.read(&info, ctx, sel, buf)
    }

    pub(super) fn write(&mut self, ctx: &IoCtx<'_>, sel: &Selection, buf: &[u8]) -> Result<()> {
        if !ctx.writable() {
            bail!(ReadOnly, "file is opened read-only");
        }
        let n = self.selected(sel)?;
        self.check_buffer(n, buf.len())?;
        if n == 0 {
            return Ok(());
        }
        let (layout, info) = self.parts();
        layout.io_init(&info, sel)?;
        if !layout.is_space_allocated() {
            let whole = match sel {
                Selection::All => true,
                Selection::Hyperslab(_) => n == info.npoints,
                Selection::None | Selection::Points(_) => false,
            };
            layout.allocate(&info, ctx, whole)?;
        }
        layout.write(&info, ctx, sel, buf)
    }

    pub(super) fn set_extent(&mut self, ctx: &IoCtx<'_>, dims: &[u64]) -> Result<()> {
        if !ctx.writable() {
            bail!(ReadOnly, "file is opened read-only");
        }
        match &self.layout {
            Layout::Compact(_) => bail!(BadLayout, "compact datasets cannot change extent"),
            Layout::Contiguous(c) if c.external().is_none() => {
                bail!(BadLayout, "contiguous datasets without external files cannot change extent")
            }
            _ => {}
        }
        if dims.len() != self.space.rank() {
            bail!(BadArgs, "{} dimensions given for a rank {} dataset", dims.len(), self.space.rank());
        }
        for (i, (&d, &m)) in dims.iter().zip(&self.space.max_dims).enumerate() {
            if m != UNLIMITED && d > m {
                bail!(BadValue, "dimension {i} ({d}) exceeds its maximum ({m})");
            }
        }
        if dims == self.space.dims.as_slice() {
            return Ok(());
        }
        let old = std::mem::replace(&mut self.space.dims, dims.to_vec());
        let resized = {
            let (layout, info) = self.parts();
            layout.set_extent(&info, ctx, &old)
        };
        if let Err(e) = resized {
            self.space.dims = old;
            return Err(e);
        }
        self.header_dirty = true;
        self.write_header(ctx)?;
        debug!(name = %self.name, ?old, new = ?self.space.dims, "extent changed");
        self.append_flush(ctx, &old)
    }

    /// Flush when a growing dimension lands on its boundary.
    fn append_flush(&mut self, ctx: &IoCtx<'_>, old: &[u64]) -> Result<()> {
        let Some(af) = self.dapl.append_flush.clone() else {
            return Ok(());
        };
        if self.layout.kind() != LayoutKind::Chunked {
            return Ok(());
        }
        let dims = self.space.dims.clone();
        let reached = af
            .boundary
            .iter()
            .zip(dims.iter().zip(old))
            .any(|(&b, (&new, &was))| b > 0 && new > was && new % b == 0);
        if reached {
            self.flush(ctx)?;
            trace!(name = %self.name, ?dims, "append flush boundary reached");
            if let Some(callback) = &af.callback {
                callback(&dims);
            }
        }
        Ok(())
    }

    /// Flush, then reload everything but the datatype from the header.
    pub(super) fn refresh(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        self.flush(ctx)?;
        let Some(addr) = self.header.as_ref().map(|h| h.addr) else {
            bail!(BadArgs, "dataset {} has no header", self.name);
        };
        let (header, raw) = ctx.with_io(|io| ObjectHeader::read(io, addr))?;
        let msgs = header::decode(&raw)?;
        let mut layout = stored_layout(
            ctx,
            msgs.layout,
            msgs.efl.as_ref(),
            &msgs.space,
            &self.dapl,
            &self.prefixes,
            self.sieve_buf_size,
        )?;
        std::mem::swap(&mut self.layout, &mut layout);
        layout.destroy();
        self.space = msgs.space;
        self.fill = msgs.fill;
        self.pipeline = msgs.pipeline;
        self.efl = msgs.efl;
        self.mtime = msgs.mtime;
        self.header = Some(header);
        self.header_dirty = false;
        let (layout, info) = self.parts();
        layout.read_oh(&info, ctx)?;
        debug!(name = %self.name, "dataset refreshed");
        Ok(())
    }

    /// Creation properties as recorded in the header.
    pub(super) fn create_props(&self) -> DatasetCreateProps {
        let mut dcpl = DatasetCreateProps {
            layout: self.layout.kind(),
            fill_value: self
                .fill
                .bytes
                .clone()
                .map(|b| (self.dtype.datatype().clone(), b)),
            fill_time: self.fill.fill_time,
            alloc_time: self.fill.alloc_time,
            filters: self.pipeline.filters.clone(),
            minimize_header: self.minimized,
            ..DatasetCreateProps::default()
        };
        match &self.layout {
            Layout::Chunked(c) => {
                dcpl.chunk_dims = Some(c.chunk_dims().to_vec());
                dcpl.dont_filter_partial_edge_chunks = c.dont_filter_partial_edge_chunks();
            }
            Layout::Contiguous(c) => {
                if let Some(storage) = c.external() {
                    dcpl.external_files = storage.files().to_vec();
                }
            }
            Layout::Virtual(v) => dcpl.virtual_mappings = v.mappings().cloned().collect(),
            Layout::Compact(_) => {}
        }
        dcpl
    }

    pub(super) fn pipeline(&self) -> &FilterPipelineMessage {
        &self.pipeline
    }

    pub(super) fn fill(&self) -> &FillValue {
        &self.fill
    }

    pub(super) fn modification_time(&self) -> Option<u32> {
        self.mtime
    }
}

impl DatasetShared {
    pub(crate) fn create(file: &Arc<FileShared>, req: Creation<'_>) -> Result<DatasetShared> {
        let Creation {
            name,
            dtype,
            space,
            dcpl,
            dapl,
            prefixes,
        } = req;
        check_datatype(dtype)?;
        check_dataspace(space)?;
        check_props(dcpl, space)?;
        check_append_flush(dapl, space, dcpl.layout)?;

        let fapl = file.fapl();
        let libver = fapl.libver_bounds;
        let early_driver = file.io()?.features().contains(DriverFeatures::ALLOCATE_EARLY);
        let alloc_time = if early_driver && dcpl.layout != LayoutKind::Virtual {
            AllocTime::Early
        } else {
            dcpl.alloc_time
        };
        let fill = FillValue::resolve(dtype, dcpl.fill_value.as_ref(), dcpl.fill_time, alloc_time, dcpl.layout)?;

        let version = libver.layout_version();
        let mut pipeline = FilterPipelineMessage::default();
        let layout = match dcpl.layout {
            LayoutKind::Compact => Layout::Compact(CompactLayout::new(version)),
            LayoutKind::Contiguous => {
                let efl = if dcpl.external_files.is_empty() {
                    None
                } else {
                    Some(ExternalStorage::new(dcpl.external_files.clone(), prefixes.efile.clone())?)
                };
                Layout::Contiguous(ContiguousLayout::new(version, efl, fapl.sieve_buf_size))
            }
            LayoutKind::Chunked => {
                let chunk = dcpl.chunk_dims.as_deref().unwrap_or_default();
                if !dcpl.filters.is_empty() {
                    let chunk_u32: Vec<u32> = chunk.iter().map(|&c| c as u32).collect();
                    let requested = FilterPipelineMessage {
                        filters: dcpl.filters.clone(),
                    };
                    let fctx = FilterContext {
                        datatype: dtype,
                        chunk_dims: &chunk_u32,
                    };
                    pipeline = prepare(file.lib().filters(), &requested, &fctx).within(Component::Pipeline)?;
                }
                Layout::Chunked(ChunkedLayout::new(version, chunk, dcpl.dont_filter_partial_edge_chunks))
            }
            LayoutKind::Virtual => {
                for m in &dcpl.virtual_mappings {
                    let same = m.source_file == SAME_FILE
                        && normalize_name(&m.source_dataset).is_ok_and(|src| src == name);
                    if same {
                        bail!(BadArgs, "virtual dataset {name:?} cannot map itself");
                    }
                }
                Layout::Virtual(VirtualLayout::new(
                    dcpl.virtual_mappings.clone(),
                    prefixes.vds.clone(),
                    dapl.vds_view,
                ))
            }
        };

        let mut dapl = dapl.clone();
        dapl.chunk_cache.get_or_insert(fapl.chunk_cache);
        let mut state = DatasetState {
            phase: Phase::Open,
            name: name.to_string(),
            dtype: BoundType::memory(dtype.clone()).bind(file.identity()),
            space: space.clone(),
            fill,
            pipeline,
            layout,
            efl: None,
            dapl,
            prefixes,
            libver,
            header: None,
            header_dirty: false,
            mtime: (libver.object_header_version() == 1).then(now),
            minimized: dcpl.minimize_header,
            sieve_buf_size: fapl.sieve_buf_size,
        };
        let ctx = IoCtx::new(file);
        if let Err(e) = state.build(&ctx, dcpl.minimize_header) {
            state.discard(&ctx);
            return Err(e.within(Component::Dataset));
        }
        let addr = state.header.as_ref().map_or(0, |h| h.addr);
        debug!(name, addr, layout = ?state.layout.kind(), "dataset created");
        Ok(DatasetShared {
            file: Arc::clone(file),
            addr,
            state: Mutex::new(state),
        })
    }

    pub(crate) fn open(
        file: &Arc<FileShared>,
        name: &str,
        addr: u64,
        dapl: &DatasetAccessProps,
        prefixes: Prefixes,
    ) -> Result<DatasetShared> {
        let ctx = IoCtx::new(file);
        let (header, raw) = ctx.with_io(|io| ObjectHeader::read(io, addr))?;
        let msgs = header::decode(&raw).within(Component::Dataset)?;
        let fapl = file.fapl();
        let layout = stored_layout(
            &ctx,
            msgs.layout,
            msgs.efl.as_ref(),
            &msgs.space,
            dapl,
            &prefixes,
            fapl.sieve_buf_size,
        )?;
        check_append_flush(dapl, &msgs.space, layout.kind())?;
        let mut dapl = dapl.clone();
        dapl.chunk_cache.get_or_insert(fapl.chunk_cache);
        // Rewrites keep the header's format generation.
        let libver = if header.version >= 2 {
            fapl.libver_bounds.max(LibVer::V18)
        } else {
            LibVer::Earliest
        };
        let mut state = DatasetState {
            phase: Phase::Open,
            name: name.to_string(),
            dtype: BoundType::memory(msgs.dtype).bind(file.identity()),
            space: msgs.space,
            fill: msgs.fill,
            pipeline: msgs.pipeline,
            layout,
            efl: msgs.efl,
            dapl,
            prefixes,
            libver,
            header: Some(header),
            header_dirty: false,
            mtime: msgs.mtime,
            minimized: false,
            sieve_buf_size: fapl.sieve_buf_size,
        };
        {
            let (layout, info) = state.parts();
            layout.read_oh(&info, &ctx).within(Component::Dataset)?;
        }
        debug!(name, addr, layout = ?state.layout.kind(), "dataset opened");
        Ok(DatasetShared {
            file: Arc::clone(file),
            addr,
            state: Mutex::new(state),
        })
    }

    pub(crate) fn addr(&self) -> u64 {
        self.addr
    }

    pub(crate) fn file(&self) -> &Arc<FileShared> {
        &self.file
    }

    /// Run `f` on the state of an open dataset.
    pub(crate) fn with_state<R>(
        &self,
        f: impl FnOnce(&mut DatasetState, &IoCtx<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            bail!(BadArgs, "dataset {:?} is closing", state.name);
        }
        let ctx = IoCtx::new(&self.file);
        f(&mut *state, &ctx)
    }

    /// Flush on behalf of the file. Closed datasets have nothing to write.
    pub(crate) fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != Phase::Open {
            return Ok(());
        }
        let ctx = IoCtx::new(&self.file);
        state.flush(&ctx)
    }

    /// Blocks until a concurrent close has finished.
    pub(crate) fn wait_closed(&self) {
        drop(self.state.lock());
    }

    /// Write everything out and drop the layout's caches. Every step runs;
    /// the first failure is returned and the rest are logged.
    pub(crate) fn shutdown(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase == Phase::Closed {
            return Ok(());
        }
        state.phase = Phase::Closing;
        let ctx = IoCtx::new(&self.file);
        let name = state.name.clone();
        let mut first: Option<Error> = None;
        let mut note = |r: Result<()>, what: &str| {
            if let Err(e) = r {
                if first.is_some() {
                    warn!(name = %name, error = %e, "{what} failed during close");
                } else {
                    first = Some(e);
                }
            }
        };
        {
            let (layout, info) = state.parts();
            note(layout.flush(&info, &ctx), "raw data flush");
            layout.destroy();
        }
        if ctx.writable() {
            note(state.write_header(&ctx), "header flush");
        }
        state.phase = Phase::Closed;
        debug!(name = %state.name, "dataset closed");
        first.map_or(Ok(()), Err)
    }
}
