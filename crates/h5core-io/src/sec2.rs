//! POSIX file driver.
//!
//! Reads and writes go through `pread`/`pwrite` by default. In
//! [`IoMode::Seek`] the driver remembers the file position and the kind of
//! the last operation, and only seeks when a request does not continue
//! where the previous one left off.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::FlockArg;
use tracing::{debug, trace};

use crate::error::{Result, VfdError};
use crate::{check_maxaddr, check_request, DriverFeatures, FileIdentity, IoMode, OpenFlags, Vfd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOp {
    Unknown,
    Read,
    Write,
}

#[derive(Debug)]
pub struct Sec2Driver {
    file: File,
    path: PathBuf,
    identity: FileIdentity,
    maxaddr: u64,
    eoa: u64,
    eof: u64,
    mode: IoMode,
    pos: Option<u64>,
    last_op: LastOp,
    ignore_disabled_locks: bool,
}

impl Sec2Driver {
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags, maxaddr: u64) -> Result<Sec2Driver> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(VfdError::BadArgs("invalid file name"));
        }
        check_maxaddr(maxaddr)?;
        if flags.contains(OpenFlags::TRUNC) && !flags.is_writable() {
            return Err(VfdError::BadArgs("truncation requires write access"));
        }

        let mut opts = OpenOptions::new();
        opts.read(true).write(flags.is_writable());
        if flags.contains(OpenFlags::CREAT) {
            if flags.contains(OpenFlags::EXCL) {
                opts.create_new(true);
            } else {
                opts.create(true);
            }
        }
        opts.truncate(flags.contains(OpenFlags::TRUNC));

        let open_failed = |source| VfdError::OpenFailed {
            path: path.to_path_buf(),
            source,
        };
        let file = opts.open(path).map_err(open_failed)?;
        let meta = file.metadata().map_err(open_failed)?;
        let identity = FileIdentity {
            device: meta.dev(),
            inode: meta.ino(),
        };
        debug!(path = %path.display(), ?flags, eof = meta.len(), "sec2 open");

        Ok(Sec2Driver {
            file,
            path: path.to_path_buf(),
            identity,
            maxaddr,
            eoa: 0,
            eof: meta.len(),
            mode: IoMode::default(),
            pos: None,
            last_op: LastOp::Unknown,
            ignore_disabled_locks: false,
        })
    }

    pub fn with_io_mode(mut self, mode: IoMode) -> Sec2Driver {
        self.mode = mode;
        self
    }

    /// Treat `ENOSYS`/`EOPNOTSUPP` from `flock` as success.
    pub fn ignore_disabled_locks(mut self, ignore: bool) -> Sec2Driver {
        self.ignore_disabled_locks = ignore;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn io_mode(&self) -> IoMode {
        self.mode
    }

    /// Remove a file from the file system.
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        std::fs::remove_file(path).map_err(|source| VfdError::DeleteFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    fn read_positional(&self, addr: u64, buf: &mut [u8]) -> Result<usize> {
        pread_full(&self.file, buf, addr).map_err(|e| VfdError::ReadError {
            addr,
            source: e.into(),
        })
    }

    fn write_positional(&self, addr: u64, buf: &[u8]) -> Result<()> {
        pwrite_all(&self.file, buf, addr).map_err(|e| VfdError::WriteError {
            addr,
            source: e.into(),
        })
    }

    fn seek_for(&mut self, addr: u64, op: LastOp) -> Result<()> {
        if self.pos == Some(addr) && self.last_op == op {
            return Ok(());
        }
        self.file
            .seek(SeekFrom::Start(addr))
            .map_err(|source| VfdError::SeekError { addr, source })?;
        self.pos = Some(addr);
        Ok(())
    }

    fn read_seek(&mut self, addr: u64, buf: &mut [u8]) -> Result<usize> {
        self.seek_for(addr, LastOp::Read)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(VfdError::ReadError { addr, source }),
            }
        }
        self.pos = Some(addr + filled as u64);
        self.last_op = LastOp::Read;
        Ok(filled)
    }

    fn write_seek(&mut self, addr: u64, buf: &[u8]) -> Result<()> {
        self.seek_for(addr, LastOp::Write)?;
        // write_all retries on EINTR
        self.file
            .write_all(buf)
            .map_err(|source| VfdError::WriteError { addr, source })?;
        self.pos = Some(addr + buf.len() as u64);
        self.last_op = LastOp::Write;
        Ok(())
    }

    fn reset_position(&mut self) {
        self.pos = None;
        self.last_op = LastOp::Unknown;
    }
}

impl Vfd for Sec2Driver {
    fn name(&self) -> &'static str {
        "sec2"
    }

    fn features(&self) -> DriverFeatures {
        DriverFeatures::AGGREGATE_METADATA
            | DriverFeatures::ACCUMULATE_METADATA
            | DriverFeatures::DATA_SIEVE
            | DriverFeatures::POSIX_COMPAT_HANDLE
            | DriverFeatures::SUPPORTS_SWMR_IO
            | DriverFeatures::DEFAULT_VFD_COMPATIBLE
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
        self.eof
    }

    fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        check_request(addr, buf.len(), self.eoa, self.maxaddr)?;
        trace!(addr, len = buf.len(), "sec2 read");
        let result = match self.mode {
            IoMode::Positional => self.read_positional(addr, buf),
            IoMode::Seek => self.read_seek(addr, buf),
        };
        let filled = match result {
            Ok(n) => n,
            Err(e) => {
                self.reset_position();
                return Err(e);
            }
        };
        buf[filled..].fill(0);
        Ok(())
    }

    fn write(&mut self, addr: u64, buf: &[u8]) -> Result<()> {
        let end = check_request(addr, buf.len(), self.eoa, self.maxaddr)?;
        trace!(addr, len = buf.len(), "sec2 write");
        let result = match self.mode {
            IoMode::Positional => self.write_positional(addr, buf),
            IoMode::Seek => self.write_seek(addr, buf),
        };
        if let Err(e) = result {
            self.reset_position();
            return Err(e);
        }
        self.eof = self.eof.max(end);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        trace!(path = %self.path.display(), "sec2 sync");
        self.file.sync_data().map_err(VfdError::SyncFailed)
    }

    fn truncate(&mut self, closing: bool) -> Result<()> {
        if self.eoa == self.eof {
            return Ok(());
        }
        trace!(eoa = self.eoa, eof = self.eof, closing, "sec2 truncate");
        self.file
            .set_len(self.eoa)
            .map_err(|source| VfdError::Truncate {
                len: self.eoa,
                source,
            })?;
        self.eof = self.eoa;
        self.reset_position();
        Ok(())
    }

    fn lock(&mut self, exclusive: bool) -> Result<()> {
        let arg = if exclusive {
            FlockArg::LockExclusiveNonblock
        } else {
            FlockArg::LockSharedNonblock
        };
        match flock(&self.file, arg) {
            Ok(()) => Ok(()),
            Err(e) if self.ignore_disabled_locks && locking_disabled(e) => {
                debug!(path = %self.path.display(), errno = %e, "file locking disabled, ignoring");
                Ok(())
            }
            Err(e) => Err(VfdError::LockUnavailable(e)),
        }
    }

    fn unlock(&mut self) -> Result<()> {
        match flock(&self.file, FlockArg::UnlockNonblock) {
            Ok(()) => Ok(()),
            Err(e) if self.ignore_disabled_locks && locking_disabled(e) => Ok(()),
            Err(e) => Err(VfdError::LockUnavailable(e)),
        }
    }

    fn identity(&self) -> FileIdentity {
        self.identity
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!(path = %self.path.display(), "sec2 close");
        let fd = self.file.into_raw_fd();
        nix::unistd::close(fd).map_err(VfdError::CloseFailed)
    }
}

fn locking_disabled(e: Errno) -> bool {
    e == Errno::ENOSYS || e == Errno::EOPNOTSUPP
}

#[allow(deprecated)]
fn flock(file: &File, arg: FlockArg) -> std::result::Result<(), Errno> {
    loop {
        match nix::fcntl::flock(file.as_raw_fd(), arg) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Call `pread` until `buf` is full or the file ends, retrying on `EINTR`.
/// Returns the number of bytes read.
fn pread_full(file: &File, buf: &mut [u8], offset: u64) -> std::result::Result<usize, Errno> {
    let mut filled = 0;
    while filled < buf.len() {
        let at = (offset + filled as u64) as nix::libc::off_t;
        match nix::sys::uio::pread(file, &mut buf[filled..], at) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Call `pwrite` until all of `buf` is written, retrying on `EINTR`.
fn pwrite_all(file: &File, buf: &[u8], offset: u64) -> std::result::Result<(), Errno> {
    let mut written = 0;
    while written < buf.len() {
        let at = (offset + written as u64) as nix::libc::off_t;
        match nix::sys::uio::pwrite(file, &buf[written..], at) {
            Ok(0) => return Err(Errno::EIO),
            Ok(n) => written += n,
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
