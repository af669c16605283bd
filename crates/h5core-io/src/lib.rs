//! File drivers for the h5core dataset engine.
//!
//! A driver presents a file as a sparse byte array addressed from zero.
//! The library tracks the end of allocated space (EOA) separately from
//! the physical end of file (EOF): reads past EOF return zeros, and
//! [`Vfd::truncate`] reconciles the two when a file is flushed or closed.
//!
//! Two drivers are provided:
//!
//! - [`Sec2Driver`]: a POSIX file using positional I/O and advisory locks
//! - [`MemoryDriver`]: a growable in-memory buffer, optionally backed by
//!   a file on disk

use std::cmp::Ordering;
use std::fmt;
use bitflags::bitflags;

pub use h5core_format;

pub mod error;
pub mod features;
pub mod memory;
pub mod sec2;
pub mod space;

pub use error::{Result, VfdError};
pub use features::DriverFeatures;
pub use memory::MemoryDriver;
pub use sec2::Sec2Driver;
pub use space::FileSpace;

use h5core_format::codec::UNDEFINED_ADDR;

/// Largest address any driver accepts.
pub const MAX_ADDR: u64 = i64::MAX as u64;

/// `(device, inode)` pair identifying the underlying file.
///
/// Two handles opened through different paths (hard links, symlinks)
/// compare equal when they reach the same file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

bitflags! {
    /// Flags accepted by driver `open` functions. No flags means read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct OpenFlags: u8 {
        const RDWR = 1 << 0;
        const CREAT = 1 << 1;
        const TRUNC = 1 << 2;
        const EXCL = 1 << 3;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub const fn is_writable(self) -> bool {
        self.contains(OpenFlags::RDWR)
    }
}

/// How [`Sec2Driver`] issues reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoMode {
    /// `pread`/`pwrite` at explicit offsets.
    #[default]
    Positional,
    /// `lseek` followed by `read`/`write`, skipping the seek when the file
    /// position already matches.
    Seek,
}

/// A file driver.
///
/// All operations are synchronous. Addresses are absolute byte offsets;
/// a request must lie entirely below the current EOA.
pub trait Vfd: Send + fmt::Debug {
    fn name(&self) -> &'static str;

    fn features(&self) -> DriverFeatures;

    fn maxaddr(&self) -> u64;

    fn get_eoa(&self) -> u64;

    /// Set the end of allocated space. Fails with `BadRange` past `maxaddr`.
    fn set_eoa(&mut self, addr: u64) -> Result<()>;

    fn get_eof(&self) -> u64;

    /// Fill `buf` from `addr`. Bytes past the physical end of file read as
    /// zero.
    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()>;

    fn write(&mut self, addr: u64, buf: &[u8]) -> Result<()>;

    /// Push buffered state to the operating system.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Resize the file to the EOA if the two differ.
    fn truncate(&mut self, closing: bool) -> Result<()>;

    fn lock(&mut self, exclusive: bool) -> Result<()>;

    fn unlock(&mut self) -> Result<()>;

    fn identity(&self) -> FileIdentity;

    /// Total order on the identity of the underlying files.
    fn cmp(&self, other: &dyn Vfd) -> Ordering {
        self.identity().cmp(&other.identity())
    }

    /// Release the underlying handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Validate a request of `len` bytes at `addr` against `eoa` and `maxaddr`.
pub(crate) fn check_request(addr: u64, len: usize, eoa: u64, maxaddr: u64) -> Result<u64> {
    if addr == UNDEFINED_ADDR {
        return Err(VfdError::AddrUndefined);
    }
    let len = len as u64;
    let end = addr
        .checked_add(len)
        .filter(|&end| end <= maxaddr)
        .ok_or(VfdError::Overflow { addr, len })?;
    if end > eoa {
        return Err(VfdError::BadRange {
            what: "request extends past the end of allocated space",
            addr: end,
            limit: eoa,
        });
    }
    Ok(end)
}

/// Validate `maxaddr` passed to a driver `open`.
pub(crate) fn check_maxaddr(maxaddr: u64) -> Result<()> {
    if maxaddr == 0 || maxaddr == UNDEFINED_ADDR {
        return Err(VfdError::BadRange {
            what: "bogus maxaddr",
            addr: maxaddr,
            limit: MAX_ADDR,
        });
    }
    if maxaddr > MAX_ADDR {
        return Err(VfdError::Overflow {
            addr: maxaddr,
            len: 0,
        });
    }
    Ok(())
}
