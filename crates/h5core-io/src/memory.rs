//! In-memory file driver.
//!
//! The file image lives in a `Vec<u8>`. When opened from a path with a
//! backing store, the image is loaded at open and written back on flush
//! and close.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use tracing::{debug, trace};

use crate::error::{Result, VfdError};
use crate::{check_maxaddr, check_request, DriverFeatures, FileIdentity, OpenFlags, Vfd, MAX_ADDR};

/// Device number used for images with no file behind them.
const ANONYMOUS_DEVICE: u64 = u64::MAX;

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct MemoryDriver {
    image: Vec<u8>,
    eoa: u64,
    maxaddr: u64,
    identity: FileIdentity,
    backing: Option<PathBuf>,
    dirty: bool,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        MemoryDriver::new()
    }
}

impl MemoryDriver {
    /// An empty anonymous image.
    pub fn new() -> MemoryDriver {
        MemoryDriver {
            image: Vec::new(),
            eoa: 0,
            maxaddr: MAX_ADDR,
            identity: FileIdentity {
                device: ANONYMOUS_DEVICE,
                inode: NEXT_ANONYMOUS.fetch_add(1, AtomicOrdering::Relaxed),
            },
            backing: None,
            dirty: false,
        }
    }

    /// Open an image for `path`. An existing file is loaded unless `TRUNC`
    /// is given. With `backing_store`, writes reach the file on flush.
    pub fn open(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        maxaddr: u64,
        backing_store: bool,
    ) -> Result<MemoryDriver> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(VfdError::BadArgs("invalid file name"));
        }
        check_maxaddr(maxaddr)?;
        let open_failed = |source| VfdError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };

        let exists = path.exists();
        if exists && flags.contains(OpenFlags::EXCL) {
            return Err(open_failed(std::io::ErrorKind::AlreadyExists.into()));
        }
        if !exists && !flags.contains(OpenFlags::CREAT) {
            return Err(open_failed(std::io::ErrorKind::NotFound.into()));
        }

        let image = if exists && !flags.contains(OpenFlags::TRUNC) {
            std::fs::read(path).map_err(open_failed)?
        } else {
            Vec::new()
        };

        let backing = (backing_store && flags.is_writable()).then(|| path.to_path_buf());
        if backing.is_some() && !exists {
            std::fs::write(path, []).map_err(open_failed)?;
        }
        let identity = match std::fs::metadata(path) {
            Ok(meta) => FileIdentity {
                device: meta.dev(),
                inode: meta.ino(),
            },
            Err(_) => MemoryDriver::new().identity,
        };
        debug!(path = %path.display(), len = image.len(), backing_store, "memory open");

        Ok(MemoryDriver {
            image,
            eoa: 0,
            maxaddr,
            identity,
            backing,
            dirty: false,
        })
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    fn write_back(&mut self) -> Result<()> {
        if let (Some(path), true) = (&self.backing, self.dirty) {
            std::fs::write(path, &self.image).map_err(|source| VfdError::WriteError {
                addr: 0,
                source,
            })?;
            self.dirty = false;
        }
        Ok(())
    }
}

impl Vfd for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::AGGREGATE_METADATA
            | DriverFeatures::ACCUMULATE_METADATA
            | DriverFeatures::DATA_SIEVE
            | DriverFeatures::ALLOCATE_EARLY
    }

    fn maxaddr(&self) -> u64 {
        self.maxaddr
    }

    fn get_eoa(&self) -> u64 {
        self.eoa
    }

    fn set_eoa(&mut self, addr: u64) -> Result<()> {
        if addr > self.maxaddr {
            return Err(VfdError::BadRange {
                what: "end of allocated space exceeds maxaddr",
                addr,
                limit: self.maxaddr,
            });
        }
        self.eoa = addr;
        Ok(())
    }

    fn get_eof(&self) -> u64 {
        self.image.len() as u64
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        check_request(addr, buf.len(), self.eoa, self.maxaddr)?;
        trace!(addr, len = buf.len(), "memory read");
        let start = (addr as usize).min(self.image.len());
        let avail = (self.image.len() - start).min(buf.len());
        buf[..avail].copy_from_slice(&self.image[start..start + avail]);
        buf[avail..].fill(0);
        Ok(())
    }

    fn write(&mut self, addr: u64, buf: &[u8]) -> Result<()> {
        let end = check_request(addr, buf.len(), self.eoa, self.maxaddr)? as usize;
        trace!(addr, len = buf.len(), "memory write");
        if end > self.image.len() {
            self.image.resize(end, 0);
        }
        self.image[addr as usize..end].copy_from_slice(buf);
        self.dirty = true;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.write_back()
    }

    fn truncate(&mut self, _closing: bool) -> Result<()> {
        if self.image.len() as u64 != self.eoa {
            self.image.resize(self.eoa as usize, 0);
            self.dirty = true;
        }
        Ok(())
    }

    fn lock(&mut self, _exclusive: bool) -> Result<()> {
        Ok(())
    }

    fn unlock(&mut self) -> Result<()> {
        Ok(())
    }

    fn identity(&self) -> FileIdentity {
        self.identity
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.write_back()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_images_are_distinct() {
        let a = MemoryDriver::new();
        let b = MemoryDriver::new();
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.cmp(&b), std::cmp::Ordering::Equal);
    }

    #[test]
    fn reads_past_eof_are_zero() {
        let mut d = MemoryDriver::new();
        d.set_eoa(16).unwrap();
        d.write(0, &[7; 4]).unwrap();
        let mut buf = [0xFFu8; 8];
        d.read(2, &mut buf).unwrap();
        assert_eq!(buf, [7, 7, 0, 0, 0, 0, 0, 0]);
        assert!(matches!(d.read(12, &mut buf), Err(VfdError::BadRange { .. })));
    }

    #[test]
    fn backing_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.h5");
        let flags = OpenFlags::RDWR | OpenFlags::CREAT;
        let mut d = Box::new(MemoryDriver::open(&path, flags, MAX_ADDR, true).unwrap());
        d.set_eoa(5).unwrap();
        d.write(0, b"hello").unwrap();
        d.close().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");

        let d = MemoryDriver::open(&path, OpenFlags::RDONLY, MAX_ADDR, true).unwrap();
        assert_eq!(d.image(), b"hello");
        assert_eq!(d.get_eof(), 5);
    }

    #[test]
    fn truncate_is_idempotent() {
        let mut d = MemoryDriver::new();
        d.set_eoa(32).unwrap();
        d.write(0, &[1; 32]).unwrap();
        d.set_eoa(8).unwrap();
        d.truncate(false).unwrap();
        assert_eq!(d.get_eof(), 8);
        d.truncate(true).unwrap();
        assert_eq!(d.get_eof(), 8);
    }
}
