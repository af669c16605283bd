//! File space allocation.
//!
//! New space is carved from the end of allocated space (EOA). Freed blocks
//! go on a free list keyed by address; adjacent blocks coalesce, and a free
//! block that reaches the EOA gives its space back by lowering the EOA.
//! The free list is not persisted.

use std::collections::BTreeMap;

use tracing::trace;

use crate::error::{Result, VfdError};

#[derive(Debug, Clone)]
pub struct FileSpace {
    eoa: u64,
    maxaddr: u64,
    /// addr -> len
    free: BTreeMap<u64, u64>,
}

impl FileSpace {
    pub fn new(eoa: u64, maxaddr: u64) -> FileSpace {
        FileSpace {
            eoa,
            maxaddr,
            free: BTreeMap::new(),
        }
    }

    pub fn eoa(&self) -> u64 {
        self.eoa
    }

    pub fn free_bytes(&self) -> u64 {
        self.free.values().sum()
    }

    pub fn free_blocks(&self) -> usize {
        self.free.len()
    }

    /// Reserve `size` bytes and return their address.
    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        if size == 0 {
            return Err(VfdError::BadArgs("zero-size allocation"));
        }
        let fit = self
            .free
            .iter()
            .find(|(_, &len)| len >= size)
            .map(|(&addr, &len)| (addr, len));
        if let Some((addr, len)) = fit {
            self.free.remove(&addr);
            if len > size {
                self.free.insert(addr + size, len - size);
            }
            trace!(addr, size, "alloc from free list");
            return Ok(addr);
        }
        let addr = self.eoa;
        self.eoa = self.bump(addr, size)?;
        trace!(addr, size, "alloc at eoa");
        Ok(addr)
    }

    /// Resize the block at `addr` from `old` to `new` bytes. The block stays
    /// in place when it can grow into the EOA or an adjacent free block;
    /// otherwise a new block is allocated and the old one freed. The caller
    /// copies any contents it needs.
    pub fn realloc(&mut self, addr: u64, old: u64, new: u64) -> Result<u64> {
        if new == 0 {
            return Err(VfdError::BadArgs("zero-size reallocation"));
        }
        if new <= old {
            if new < old {
                self.free(addr + new, old - new)?;
            }
            return Ok(addr);
        }
        let end = addr + old;
        let extra = new - old;
        if end == self.eoa {
            self.eoa = self.bump(end, extra)?;
            return Ok(addr);
        }
        if let Some(&len) = self.free.get(&end) {
            if len >= extra {
                self.free.remove(&end);
                if len > extra {
                    self.free.insert(end + extra, len - extra);
                }
                return Ok(addr);
            }
        }
        let moved = self.alloc(new)?;
        self.free(addr, old)?;
        Ok(moved)
    }

    /// Return `size` bytes at `addr` to the free list.
    pub fn free(&mut self, addr: u64, size: u64) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let end = addr
            .checked_add(size)
            .ok_or(VfdError::Overflow { addr, len: size })?;
        if end > self.eoa {
            return Err(VfdError::BadRange {
                what: "freed block extends past the end of allocated space",
                addr: end,
                limit: self.eoa,
            });
        }

        let mut start = addr;
        let mut len = size;
        if let Some((&prev, &plen)) = self.free.range(..=addr).next_back() {
            if prev + plen > addr {
                return Err(VfdError::BadArgs("block is already free"));
            }
            if prev + plen == addr {
                self.free.remove(&prev);
                start = prev;
                len += plen;
            }
        }
        if let Some((&next, &nlen)) = self.free.range(addr..).next() {
            if next < end {
                return Err(VfdError::BadArgs("block is already free"));
            }
            if next == end {
                self.free.remove(&next);
                len += nlen;
            }
        }

        if start + len == self.eoa {
            trace!(addr = start, len, "free shrinks eoa");
            self.eoa = start;
        } else {
            self.free.insert(start, len);
        }
        Ok(())
    }

    fn bump(&self, addr: u64, size: u64) -> Result<u64> {
        addr.checked_add(size)
            .filter(|&end| end <= self.maxaddr)
            .ok_or(VfdError::OutOfSpace {
                requested: size,
                maxaddr: self.maxaddr,
            })
    }
}
