//! Contiguous layout: one block of file space, or a list of external files.

use h5core_format::data_layout::DataLayout;
use h5core_format::dataspace::UNLIMITED;
use h5core_format::selection::Selection;
use tracing::debug;

use super::efl::ExternalStorage;
use super::sieve::SieveBuffer;
use super::{DatasetInfo, LayoutOps};
use crate::context::IoCtx;
use crate::error::{bail, err, Result};
use crate::selection::linear_runs;

/// Largest buffer used when writing fill values.
const FILL_BLOCK: u64 = 1 << 20;

#[derive(Debug)]
pub struct ContiguousLayout {
    version: u8,
    addr: Option<u64>,
    size: u64,
    efl: Option<ExternalStorage>,
    sieve: SieveBuffer,
    header_dirty: bool,
}

impl ContiguousLayout {
    pub fn new(version: u8, efl: Option<ExternalStorage>, sieve_buf_size: usize) -> ContiguousLayout {
        ContiguousLayout {
            version,
            addr: None,
            size: 0,
            efl,
            sieve: SieveBuffer::new(sieve_buf_size),
            header_dirty: false,
        }
    }

    /// State for a decoded layout message.
    pub fn from_stored(
        version: u8,
        addr: Option<u64>,
        size: u64,
        efl: Option<ExternalStorage>,
        sieve_buf_size: usize,
    ) -> ContiguousLayout {
        ContiguousLayout {
            addr,
            size,
            ..ContiguousLayout::new(version, efl, sieve_buf_size)
        }
    }

    pub fn external(&self) -> Option<&ExternalStorage> {
        self.efl.as_ref()
    }

    pub fn external_mut(&mut self) -> Option<&mut ExternalStorage> {
        self.efl.as_mut()
    }

    pub fn addr(&self) -> Option<u64> {
        self.addr
    }

    /// Write fill values over `[from, to)` of the logical byte stream.
    fn write_fill(&mut self, info: &DatasetInfo<'_>, ctx: &IoCtx<'_>, from: u64, to: u64) -> Result<()> {
        let elem = info.elem_size.max(1) as u64;
        let block_len = (FILL_BLOCK / elem).max(1) * elem;
        let block = info.fill.buffer(block_len.min(to.saturating_sub(from)) as usize);
        let mut pos = from;
        while pos < to {
            let n = (to - pos).min(block.len() as u64) as usize;
            match (&self.efl, self.addr) {
                (Some(efl), _) => efl.write(pos, &block[..n])?,
                (None, Some(addr)) => ctx.write(addr + pos, &block[..n])?,
                (None, None) => break,
            }
            pos += n as u64;
        }
        Ok(())
    }
}

fn max_data_size(info: &DatasetInfo<'_>) -> Option<u64> {
    if info.max_dims.iter().any(|&d| d == UNLIMITED) {
        return None;
    }
    info.max_dims
        .iter()
        .try_fold(info.elem_size as u64, |acc, &d| acc.checked_mul(d))
}

impl LayoutOps for ContiguousLayout {
    fn construct(&mut self, info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        let size = info
            .data_size()
            .ok_or_else(|| err!(Overflow, "contiguous storage size overflows"))?;
        match &self.efl {
            None if info.dims != info.max_dims => bail!(
                BadLayout,
                "extendible contiguous datasets need an external file list"
            ),
            None => {}
            Some(efl) => {
                let needed = max_data_size(info).unwrap_or(u64::MAX);
                if efl.capacity() < needed {
                    bail!(
                        BadRange,
                        "external files hold {} bytes, the maximum extent needs {needed}",
                        efl.capacity()
                    );
                }
            }
        }
        self.size = size;
        self.header_dirty = true;
        Ok(())
    }

    fn is_space_allocated(&self) -> bool {
        self.efl.is_some() || self.addr.is_some() || self.size == 0
    }

    fn is_data_cached(&self) -> bool {
        self.sieve.is_dirty()
    }

    fn read_oh(&mut self, info: &DatasetInfo<'_>, _ctx: &IoCtx<'_>) -> Result<()> {
        let expected = info
            .data_size()
            .ok_or_else(|| err!(Overflow, "contiguous storage size overflows"))?;
        if self.efl.is_none() && self.addr.is_some() && self.size < expected {
            bail!(
                Corrupt,
                "contiguous storage holds {} bytes, the dataspace needs {expected}",
                self.size
            );
        }
        self.size = expected;
        Ok(())
    }

    fn io_init(&self, _info: &DatasetInfo<'_>, _sel: &Selection) -> Result<()> {
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
        let runs = linear_runs(sel, info.dims);
        if self.efl.is_none() && self.addr.is_none() {
            info.fill.fill(buf);
            return Ok(());
        }
        for r in runs {
            let (m, n) = (r.mem as usize * elem, r.len as usize * elem);
            let off = r.off * elem as u64;
            let dst = &mut buf[m..m + n];
            match (&self.efl, self.addr) {
                (Some(efl), _) => efl.read(off, dst)?,
                (None, Some(addr)) => self.sieve.read(ctx, addr, self.size, off, dst)?,
                (None, None) => info.fill.fill(dst),
            }
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
        if self.efl.is_none() && self.addr.is_none() {
            if self.size == 0 {
                return Ok(());
            }
            bail!(AddrUndefined, "contiguous storage is not allocated");
        }
        for r in linear_runs(sel, info.dims) {
            let (m, n) = (r.mem as usize * elem, r.len as usize * elem);
            let off = r.off * elem as u64;
            let src = &buf[m..m + n];
            match (&self.efl, self.addr) {
                (Some(efl), _) => efl.write(off, src)?,
                (None, Some(addr)) => self.sieve.write(ctx, addr, self.size, off, src)?,
                (None, None) => {}
            }
        }
        Ok(())
    }

    fn flush(&mut self, _info: &DatasetInfo<'_>, ctx: &IoCtx<'_>) -> Result<()> {
        match self.addr {
            Some(addr) => self.sieve.flush(ctx, addr),
            None => Ok(()),
        }
    }

    fn destroy(&mut self) {
        self.sieve.invalidate();
    }

    fn allocate(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        full_overwrite: bool,
    ) -> Result<()> {
        if self.efl.is_none() {
            if self.addr.is_some() || self.size == 0 {
                return Ok(());
            }
            let addr = ctx.alloc(self.size)?;
            debug!(addr, size = self.size, "contiguous storage allocated");
            self.addr = Some(addr);
            self.header_dirty = true;
        }
        if info.fill.write_on_alloc() && !full_overwrite {
            self.write_fill(info, ctx, 0, self.size)?;
        }
        Ok(())
    }

    fn set_extent(
        &mut self,
        info: &DatasetInfo<'_>,
        ctx: &IoCtx<'_>,
        _old_dims: &[u64],
    ) -> Result<()> {
        if self.efl.is_none() {
            bail!(BadLayout, "contiguous datasets without external files cannot change extent");
        }
        let new_size = info
            .data_size()
            .ok_or_else(|| err!(Overflow, "contiguous storage size overflows"))?;
        let old_size = self.size;
        // Storage is a linear byte stream; a shrink clears the cut-off tail so
        // a later grow reads fill there.
        if new_size < old_size {
            self.write_fill(info, ctx, new_size, old_size)?;
        } else if new_size > old_size && info.fill.write_on_alloc() {
            self.write_fill(info, ctx, old_size, new_size)?;
        }
        self.size = new_size;
        self.header_dirty = true;
        Ok(())
    }

    fn free_storage(&mut self, ctx: &IoCtx<'_>) -> Result<()> {
        self.sieve.invalidate();
        if let Some(addr) = self.addr.take() {
            ctx.free(addr, self.size)?;
        }
        if let Some(efl) = &mut self.efl {
            efl.free(ctx)?;
        }
        Ok(())
    }

    fn storage_size(&self) -> u64 {
        if self.addr.is_some() || self.efl.is_some() {
            self.size
        } else {
            0
        }
    }

    fn message(&self, _info: &DatasetInfo<'_>) -> (u8, DataLayout) {
        (
            self.version,
            DataLayout::Contiguous {
                addr: self.addr,
                size: self.size,
            },
        )
    }

    fn take_header_dirty(&mut self) -> bool {
        std::mem::take(&mut self.header_dirty)
    }
}
