//! Compact layout: the raw data lives in the layout message itself.

use h5core_format::data_layout::{DataLayout, MAX_COMPACT_SIZE};
use h5core_format::selection::Selection;

use super::{gather, scatter, DatasetInfo, LayoutOps};
use crate::context::IoCtx;
use crate::error::{bail, Result};
use crate::selection::linear_runs;

#[derive(Debug)]
pub struct CompactLayout {
    version: u8,
    data: Vec<u8>,
    dirty: bool,
}

impl CompactLayout {
    pub fn new(version: u8) -> CompactLayout {
        CompactLayout {
            version,
            data: Vec::new(),
            dirty: false,
        }
    }

    /// State for a decoded layout message.
    pub fn from_stored(version: u8, data: Vec<u8>) -> CompactLayout {
        CompactLayout {
            version,
            data,
            dirty: false,
        }
    }
}

impl LayoutOps for CompactLayout {
    fn construct(&mut self, info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        let size = match info.data_size() {
            Some(n) if n <= MAX_COMPACT_SIZE as u64 => n as usize,
            Some(n) => bail!(
                BadRange,
                "compact raw data of {n} bytes exceeds the {MAX_COMPACT_SIZE} byte limit"
            ),
            None => bail!(Overflow, "compact raw data size overflows"),
        };
        self.data = info.fill.buffer(size);
        self.dirty = true;
        Ok(())
    }

    fn is_space_allocated(&self) -> bool {
        true
    }

    fn is_data_cached(&self) -> bool {
        self.dirty
    }

    fn read_oh(&mut self, info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        if Some(self.data.len() as u64) != info.data_size() {
            bail!(
                Corrupt,
                "compact layout holds {} bytes, the dataspace needs {:?}",
                self.data.len(),
                info.data_size()
            );
        }
        Ok(())
    }

    fn io_init(&self, _info: &DatasetInfo<'_>, _sel: &Selection) -> Result<()> {
        Ok(())
    }

    fn read(
        &mut self,
        info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &mut [u8],
    ) -> Result<()> {
        gather(&linear_runs(sel, info.dims), &self.data, buf, info.elem_size);
        Ok(())
    }

    fn write(
        &mut self,
        info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        sel: &Selection,
        buf: &[u8],
    ) -> Result<()> {
        scatter(&linear_runs(sel, info.dims), buf, &mut self.data, info.elem_size);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self, _info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        // The buffer reaches the file when the header rewrites the layout message.
        Ok(())
    }

    fn destroy(&mut self) {}

    fn allocate(
        &mut self,
        _info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        _full_overwrite: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn set_extent(
        &mut self,
        _info: &DatasetInfo<'_>,
        _ctx: &IoCtx<'_>,
        _old_dims: &[u64],
    ) -> Result<()> {
        bail!(BadLayout, "compact datasets cannot change extent")
    }

    fn free_storage(&mut self, _ctx: &IoCtx<'_>) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn storage_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn message(&self, _info: &DatasetInfo<'_>) -> (u8, DataLayout) {
        (
            self.version,
            DataLayout::Compact {
                data: self.data.clone(),
            },
        )
    }

    fn take_header_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
