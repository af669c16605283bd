//! Raw-data layouts.
//!
//! Each layout keeps its runtime state inline in a [`Layout`] variant and
//! implements [`LayoutOps`]; the dataset dispatches through the enum.

pub mod chunked;
pub mod compact;
pub mod contiguous;
pub mod efl;
pub mod sieve;
pub mod vds;

use h5core_format::data_layout::DataLayout;
use h5core_format::datatype::Datatype;
use h5core_format::filter_pipeline::FilterPipelineMessage;
use h5core_format::selection::Selection;

use crate::context::IoCtx;
use crate::error::Result;
use crate::fill::FillValue;
use crate::props::{DatasetAccessProps, LayoutKind};

pub use chunked::ChunkedLayout;
pub use compact::CompactLayout;
pub use contiguous::ContiguousLayout;
pub use vds::VirtualLayout;

/// What a layout needs to know about the dataset it serves.
#[derive(Debug, Clone, Copy)]
pub struct DatasetInfo<'a> {
    pub dtype: &'a Datatype,
    pub elem_size: usize,
    pub dims: &'a [u64],
    pub max_dims: &'a [u64],
    /// Elements in the current extent (zero for a null dataspace).
    pub npoints: u64,
    pub fill: &'a FillValue,
    pub pipeline: &'a FilterPipelineMessage,
    pub dapl: &'a DatasetAccessProps,
    pub sieve_buf_size: usize,
}

impl DatasetInfo<'_> {
    /// Bytes of raw data in the current extent.
    pub fn data_size(&self) -> Option<u64> {
        self.npoints.checked_mul(self.elem_size as u64)
    }
}

/// Operations every layout provides.
pub trait LayoutOps {
    /// Validate against a new dataset and set up storage bookkeeping.
    fn construct(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()>;

    fn is_space_allocated(&self) -> bool;

    /// Whether raw data is held in memory waiting to be written.
    fn is_data_cached(&self) -> bool;

    /// Finish initialization after the layout message was decoded.
    fn read_oh(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()>;

    /// Check that `sel` can be used for I/O on this layout.
    fn io_init(&self, info: &DatasetInfo<'_>, sel: &Selection) -> Result<()>;

    /// Read the selected elements, packed, into `buf`.
    fn read(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Write packed elements from `buf` to the selection.
    fn write(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &[u8],
    ) -> Result<()>;

    /// Push cached raw data and index structures to the file.
    fn flush(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()>;

    /// Drop every cache and open handle. Call `flush` first.
    fn destroy(&mut self);

    /// Reserve storage for the current extent. `full_overwrite` skips the
    /// fill because the caller is about to write every element.
    fn allocate(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        full_overwrite: bool,
    ) -> Result<()>;

    /// Adjust storage after the extent changed from `old_dims` to `info.dims`.
    fn set_extent(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        old_dims: &[u64],
    ) -> Result<()>;

    /// Return all raw-data storage to the allocator.
    fn free_storage(&mut self, ctx: &IoCtx<'_>) -> Result<()>;

    /// Bytes of file space holding raw data.
    fn storage_size(&self) -> u64;

    /// Layout as stored in the header, with the layout message version.
    fn message(&self, info: &DatasetInfo<'_>) -> (u8, DataLayout);

    /// Whether the layout message changed since the last call.
    fn take_header_dirty(&mut self) -> bool;
}

/// Per-variant layout state.
#[derive(Debug)]
pub enum Layout {
    Compact(CompactLayout),
    Contiguous(ContiguousLayout),
    Chunked(ChunkedLayout),
    Virtual(VirtualLayout),
}

macro_rules! dispatch {
    ($self:expr, $l:ident => $body:expr) => {
        match $self {
            Layout::Compact($l) => $body,
            Layout::Contiguous($l) => $body,
            Layout::Chunked($l) => $body,
            Layout::Virtual($l) => $body,
        }
    };
}

impl Layout {
    pub fn kind(&self) -> LayoutKind {
        match self {
            Layout::Compact(_) => LayoutKind::Compact,
            Layout::Contiguous(_) => LayoutKind::Contiguous,
            Layout::Chunked(_) => LayoutKind::Chunked,
            Layout::Virtual(_) => LayoutKind::Virtual,
        }
    }

    pub fn as_chunked(&self) -> Option<&ChunkedLayout> {
        match self {
            Layout::Chunked(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_chunked_mut(&mut self) -> Option<&mut ChunkedLayout> {
        match self {
            Layout::Chunked(c) => Some(c),
            _ => None,
        }
    }
}

impl LayoutOps for Layout {
    fn construct(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        dispatch!(self, l => l.construct(info, ctx))
    }

    fn is_space_allocated(&self) -> bool {
        dispatch!(self, l => l.is_space_allocated())
    }

    fn is_data_cached(&self) -> bool {
        dispatch!(self, l => l.is_data_cached())
    }

    fn read_oh(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        dispatch!(self, l => l.read_oh(info, ctx))
    }

    fn io_init(&self, info: &DatasetInfo<'_>, sel: &Selection) -> Result<()> {
        dispatch!(self, l => l.io_init(info, sel))
    }

    fn read(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &mut [u8],
    ) -> Result<()> {
        dispatch!(self, l => l.read(info, ctx, sel, buf))
    }

    fn write(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &[u8],
    ) -> Result<()> {
        dispatch!(self, l => l.write(info, ctx, sel, buf))
    }

    fn flush(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        dispatch!(self, l => l.flush(info, ctx))
    }

    fn destroy(&mut self) {
        dispatch!(self, l => l.destroy())
    }

    fn allocate(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        full_overwrite: bool,
    ) -> Result<()> {
        dispatch!(self, l => l.allocate(info, ctx, full_overwrite))
    }

    fn set_extent(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        old_dims: &[u64],
    ) -> Result<()> {
        dispatch!(self, l => l.set_extent(info, ctx, old_dims))
    }

    fn free_storage(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        dispatch!(self, l => l.free_storage(ctx))
    }

    fn storage_size(&self) -> u64 {
        dispatch!(self, l => l.storage_size())
    }

    fn message(&self, info: &DatasetInfo<'_>) -> (u8, DataLayout) {
        dispatch!(self, l => l.message(info))
    }

    fn take_header_dirty(&mut self) -> bool {
        dispatch!(self, l => l.take_header_dirty())
    }
}

/// Copy run by run between a packed caller buffer and an in-memory image of
/// the storage, both in units of `elem` bytes.
pub(crate) fn gather(runs: &[crate::selection::Run], storage: &[u8], buf: &mut [u8], elem: usize) {
    for r in runs {
        let (m, o, n) = (r.mem as usize * elem, r.off as usize * elem, r.len as usize * elem);
        buf[m..m + n].copy_from_slice(&storage[o..o + n]);
    }
}

pub(crate) fn scatter(runs: &[crate::selection::Run], buf: &[u8], storage: &mut [u8], elem: usize) {
    for r in runs {
        let (m, o, n) = (r.mem as usize * elem, r.off as usize * elem, r.len as usize * elem);
        storage[o..o + n].copy_from_slice(&buf[m..m + n]);
    }
}
