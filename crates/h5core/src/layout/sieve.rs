//! Single-window sieve buffer over contiguous raw data.
//!
//! Offsets are relative to the start of the storage block; `base` is the
//! block's file address and `extent` its size.

use tracing::trace;

use crate::context::IoCtx;
use crate::error::Result;

#[derive(Debug)]
struct Window {
    start: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl Window {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, off: u64, len: u64) -> bool {
        off >= self.start && off + len <= self.end()
    }

    fn overlaps(&self, off: u64, len: u64) -> bool {
        off < self.end() && self.start < off + len
    }
}

#[derive(Debug)]
pub struct SieveBuffer {
    cap: usize,
    window: Option<Window>,
}

impl SieveBuffer {
    pub fn new(cap: usize) -> SieveBuffer {
        SieveBuffer { cap, window: None }
    }

    pub fn is_dirty(&self) -> bool {
        self.window.as_ref().is_some_and(|w| w.dirty)
    }

    pub fn read(
        &mut self,
        ctx: &IoCtx<'_>,
        base: u64,
        extent: u64,
        off: u64,
        out: &mut [u8],
    ) -> Result<()> {
        let len = out.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if let Some(w) = &self.window {
            if w.contains(off, len) {
                let at = (off - w.start) as usize;
                out.copy_from_slice(&w.data[at..at + out.len()]);
                return Ok(());
            }
        }
        if out.len() > self.cap {
            // Direct read; a dirty overlapping window must reach disk first.
            if self.window.as_ref().is_some_and(|w| w.dirty && w.overlaps(off, len)) {
                self.flush(ctx, base)?;
            }
            return ctx.read(base + off, out);
        }
        self.load(ctx, base, extent, off)?;
        if let Some(w) = &self.window {
            let at = (off - w.start) as usize;
            out.copy_from_slice(&w.data[at..at + out.len()]);
        }
        Ok(())
    }

    pub fn write(
        &mut self,
        ctx: &IoCtx<'_>,
        base: u64,
        extent: u64,
        off: u64,
        data: &[u8],
    ) -> Result<()> {
        let len = data.len() as u64;
        if len == 0 {
            return Ok(());
        }
        if let Some(w) = &mut self.window {
            if w.contains(off, len) {
                let at = (off - w.start) as usize;
                w.data[at..at + data.len()].copy_from_slice(data);
                w.dirty = true;
                return Ok(());
            }
            // Append to the window when the request continues it.
            if off == w.end() && w.data.len() + data.len() <= self.cap && off + len <= extent {
                w.data.extend_from_slice(data);
                w.dirty = true;
                return Ok(());
            }
        }
        if data.len() > self.cap {
            if let Some(w) = &mut self.window {
                if w.overlaps(off, len) {
                    // Patch the window so it stays coherent, then write through.
                    let lo = off.max(w.start);
                    let hi = (off + len).min(w.end());
                    let (ws, ds) = ((lo - w.start) as usize, (lo - off) as usize);
                    let n = (hi - lo) as usize;
                    w.data[ws..ws + n].copy_from_slice(&data[ds..ds + n]);
                }
            }
            return ctx.write(base + off, data);
        }
        self.load(ctx, base, extent, off)?;
        if let Some(w) = &mut self.window {
            let at = (off - w.start) as usize;
            w.data[at..at + data.len()].copy_from_slice(data);
            w.dirty = true;
        }
        Ok(())
    }

    /// Write the window back if it is dirty.
    pub fn flush(&mut self, ctx: &IoCtx<'_>, base: u64) -> Result<()> {
        if let Some(w) = &mut self.window {
            if w.dirty {
                trace!(start = w.start, len = w.data.len(), "sieve flush");
                ctx.write(base + w.start, &w.data)?;
                w.dirty = false;
            }
        }
        Ok(())
    }

    /// Drop the window without writing it.
    pub fn invalidate(&mut self) {
        self.window = None;
    }

    fn load(&mut self, ctx: &IoCtx<'_>, base: u64, extent: u64, off: u64) -> Result<()> {
        self.flush(ctx, base)?;
        let len = (self.cap as u64).min(extent.saturating_sub(off)) as usize;
        let mut data = vec![0u8; len];
        ctx.read(base + off, &mut data)?;
        trace!(start = off, len, "sieve load");
        self.window = Some(Window {
            start: off,
            data,
            dirty: false,
        });
        Ok(())
    }
}
