//! Files: the superblock, a flat table of dataset names, and the driver.
//!
//! A file opens onto one [`FileShared`], which owns the driver and the space
//! allocator. Opening a file that is already open (through any path that
//! reaches the same inode) returns the existing state, so every handle sees
//! the same datasets.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use h5core_format::dataspace::Dataspace;
use h5core_format::datatype::Datatype;
use h5core_format::link::HardLink;
use h5core_format::message_type::MessageType;
use h5core_format::object_header::RawMessage;
use h5core_format::superblock::{Superblock, SUPERBLOCK_V2_SIZE};
use h5core_format::OFFSET_SIZE;
use h5core_io::{
    DriverFeatures, FileIdentity, FileSpace, MemoryDriver, OpenFlags, Sec2Driver, Vfd, MAX_ADDR,
};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::config::FileLocking;
use crate::context::Library;
use crate::dataset::Dataset;
use crate::error::{bail, err, Component, Error, Result, ResultExt};
use crate::header::ObjectHeader;
use crate::props::{DatasetAccessProps, DatasetCreateProps, Driver, FileAccessProps};

/// Root headers always use the version 2 layout.
const ROOT_HEADER_VERSION: u8 = 2;

/// How an existing file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    #[default]
    ReadOnly,
    ReadWrite,
}

/// The driver together with the allocator that manages its address space.
pub(crate) struct FileIo {
    driver: Box<dyn Vfd>,
    space: FileSpace,
    writable: bool,
}

impl FileIo {
    fn check_writable(&self) -> Result<()> {
        if !self.writable {
            bail!(ReadOnly, "file is opened read-only");
        }
        Ok(())
    }

    fn sync_eoa(&mut self) -> Result<()> {
        let eoa = self.space.eoa();
        if self.driver.get_eoa() != eoa {
            self.driver.set_eoa(eoa).within(Component::Vfd)?;
        }
        Ok(())
    }

    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.driver.read(addr, buf).within(Component::Vfd)
    }

    pub fn read_vec(&mut self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read(addr, &mut buf)?;
        Ok(buf)
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.driver.write(addr, data).within(Component::Vfd)
    }

    pub fn alloc(&mut self, size: u64) -> Result<u64> {
        self.check_writable()?;
        let addr = self.space.alloc(size).within(Component::Vfd)?;
        self.sync_eoa()?;
        Ok(addr)
    }

    pub fn free(&mut self, addr: u64, size: u64) -> Result<()> {
        self.check_writable()?;
        self.space.free(addr, size).within(Component::Vfd)?;
        self.sync_eoa()
    }

    pub fn realloc(&mut self, addr: u64, old: u64, new: u64) -> Result<u64> {
        self.check_writable()?;
        let moved = self.space.realloc(addr, old, new).within(Component::Vfd)?;
        self.sync_eoa()?;
        Ok(moved)
    }

    pub fn features(&self) -> DriverFeatures {
        self.driver.features()
    }

    /// Push driver-buffered writes to storage.
    pub fn flush_driver(&mut self) -> Result<()> {
        self.driver.flush().within(Component::Vfd)
    }

    fn write_superblock(&mut self, root_addr: u64) -> Result<()> {
        let sb = Superblock::new(root_addr, self.space.eoa());
        self.write(0, &sb.encode())
    }

    /// Release the driver, logging instead of reporting failures.
    fn abandon(self, locked: bool) {
        let mut driver = self.driver;
        if locked {
            if let Err(e) = driver.unlock() {
                warn!(error = %e, "unlocking abandoned file failed");
            }
        }
        if let Err(e) = driver.close() {
            warn!(error = %e, "closing abandoned file failed");
        }
    }
}

impl fmt::Debug for FileIo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileIo")
            .field("driver", &self.driver.name())
            .field("eoa", &self.space.eoa())
            .field("writable", &self.writable)
            .finish()
    }
}

struct RootGroup {
    header: ObjectHeader,
    links: Vec<HardLink>,
    dirty: bool,
}

impl RootGroup {
    fn messages(&self) -> Vec<RawMessage> {
        self.links
            .iter()
            .map(|l| RawMessage::new(MessageType::Link, l.encode(OFFSET_SIZE)))
            .collect()
    }
}

/// State shared by every handle to one open file.
pub(crate) struct FileShared {
    lib: Library,
    path: PathBuf,
    identity: FileIdentity,
    writable: bool,
    locked: bool,
    fapl: FileAccessProps,
    io: Mutex<Option<FileIo>>,
    root: Mutex<RootGroup>,
}

/// Resolve the locking policy into (lock at all, tolerate disabled locks).
fn locking(lib: &Library, fapl: &FileAccessProps) -> (bool, bool) {
    let policy = fapl.file_locking.unwrap_or(lib.config().file_locking);
    let ignore = fapl
        .ignore_disabled_locks
        .unwrap_or(policy == FileLocking::BestEffort);
    (policy != FileLocking::Disabled, ignore)
}

fn open_driver(
    lib: &Library,
    path: &Path,
    flags: OpenFlags,
    fapl: &FileAccessProps,
) -> Result<Box<dyn Vfd>> {
    let driver: Box<dyn Vfd> = match fapl.driver {
        Driver::Sec2 => {
            let (_, ignore) = locking(lib, fapl);
            Box::new(
                Sec2Driver::open(path, flags, MAX_ADDR)
                    .within(Component::Vfd)?
                    .with_io_mode(fapl.io_mode)
                    .ignore_disabled_locks(ignore),
            )
        }
        Driver::Memory { backing_store } => Box::new(
            MemoryDriver::open(path, flags, MAX_ADDR, backing_store).within(Component::Vfd)?,
        ),
    };
    Ok(driver)
}

/// Lock per the configured policy; on failure the driver is closed.
fn lock_driver(
    lib: &Library,
    fapl: &FileAccessProps,
    driver: Box<dyn Vfd>,
    exclusive: bool,
) -> Result<(Box<dyn Vfd>, bool)> {
    let (enabled, _) = locking(lib, fapl);
    if !enabled {
        return Ok((driver, false));
    }
    let mut driver = driver;
    match driver.lock(exclusive) {
        Ok(()) => Ok((driver, true)),
        Err(e) => {
            if let Err(close) = driver.close() {
                warn!(error = %close, "closing file after a failed lock failed");
            }
            Err(Error::from(e).within(Component::Vfd))
        }
    }
}

fn find_open(files: &[Weak<FileShared>], identity: FileIdentity) -> Option<Arc<FileShared>> {
    files
        .iter()
        .filter_map(Weak::upgrade)
        .find(|f| f.identity == identity)
}

/// Split off a leading `/` and reject anything but a single name.
pub(crate) fn normalize_name(name: &str) -> Result<&str> {
    let name = name.strip_prefix('/').unwrap_or(name);
    if name.is_empty() {
        bail!(BadArgs, "dataset name is empty");
    }
    if name.contains('/') {
        bail!(NotFound, "intermediate groups in {name:?} do not exist");
    }
    Ok(name)
}

impl FileShared {
    pub(crate) fn create(lib: &Library, path: &Path, fapl: &FileAccessProps) -> Result<Arc<FileShared>> {
        let mut files = lib.files();
        files.retain(|w| w.strong_count() > 0);
        // Truncating happens at open, so check for an open file first.
        if let Ok(meta) = std::fs::metadata(path) {
            let identity = FileIdentity {
                device: meta.dev(),
                inode: meta.ino(),
            };
            if find_open(&files, identity).is_some() {
                bail!(OpenFailed, "{} is open and cannot be truncated", path.display());
            }
        }

        let flags = OpenFlags::RDWR | OpenFlags::CREAT | OpenFlags::TRUNC;
        let driver = open_driver(lib, path, flags, fapl)?;
        let identity = driver.identity();
        let (driver, locked) = lock_driver(lib, fapl, driver, true)?;
        let mut io = FileIo {
            driver,
            space: FileSpace::new(SUPERBLOCK_V2_SIZE as u64, MAX_ADDR),
            writable: true,
        };
        let init = io.sync_eoa().and_then(|()| {
            let header = ObjectHeader::create(&mut io, ROOT_HEADER_VERSION, &[], false)?;
            io.write_superblock(header.addr)?;
            Ok(header)
        });
        let header = match init {
            Ok(h) => h,
            Err(e) => {
                io.abandon(locked);
                return Err(e);
            }
        };
        debug!(path = %path.display(), driver = io.driver.name(), "file created");

        let shared = Arc::new(FileShared {
            lib: lib.clone(),
            path: path.to_path_buf(),
            identity,
            writable: true,
            locked,
            fapl: fapl.clone(),
            io: Mutex::new(Some(io)),
            root: Mutex::new(RootGroup {
                header,
                links: Vec::new(),
                dirty: false,
            }),
        });
        files.push(Arc::downgrade(&shared));
        Ok(shared)
    }

    pub(crate) fn open(
        lib: &Library,
        path: &Path,
        mode: OpenMode,
        fapl: &FileAccessProps,
    ) -> Result<Arc<FileShared>> {
        let mut files = lib.files();
        files.retain(|w| w.strong_count() > 0);
        let writable = mode == OpenMode::ReadWrite;
        let flags = if writable {
            OpenFlags::RDWR
        } else {
            OpenFlags::RDONLY
        };
        let driver = open_driver(lib, path, flags, fapl)?;
        let identity = driver.identity();

        if let Some(existing) = find_open(&files, identity) {
            if let Err(e) = driver.close() {
                warn!(error = %e, "closing duplicate driver failed");
            }
            if writable && !existing.writable {
                bail!(
                    OpenFailed,
                    "{} is already open read-only",
                    path.display()
                );
            }
            debug!(path = %path.display(), "file already open, sharing");
            return Ok(existing);
        }

        let (driver, locked) = lock_driver(lib, fapl, driver, writable)?;
        let mut io = FileIo {
            driver,
            space: FileSpace::new(SUPERBLOCK_V2_SIZE as u64, MAX_ADDR),
            writable,
        };
        let root = match Self::load_root(&mut io) {
            Ok(root) => root,
            Err(e) => {
                io.abandon(locked);
                return Err(e);
            }
        };
        debug!(
            path = %path.display(),
            writable,
            datasets = root.links.len(),
            "file opened"
        );

        let shared = Arc::new(FileShared {
            lib: lib.clone(),
            path: path.to_path_buf(),
            identity,
            writable,
            locked,
            fapl: fapl.clone(),
            io: Mutex::new(Some(io)),
            root: Mutex::new(root),
        });
        files.push(Arc::downgrade(&shared));
        Ok(shared)
    }

    fn load_root(io: &mut FileIo) -> Result<RootGroup> {
        io.sync_eoa()?;
        let sb = Superblock::decode(&io.read_vec(0, SUPERBLOCK_V2_SIZE)?)
            .map_err(|e| err!(OpenFailed, "not a readable file: {e}"))?;
        io.space = FileSpace::new(sb.eof_addr.max(SUPERBLOCK_V2_SIZE as u64), MAX_ADDR);
        io.sync_eoa()?;
        let (header, msgs) = ObjectHeader::read(io, sb.root_addr)?;
        let links = msgs
            .iter()
            .filter(|m| m.msg_type == MessageType::Link)
            .map(|m| HardLink::decode(&m.data, OFFSET_SIZE))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(RootGroup {
            header,
            links,
            dirty: false,
        })
    }

    pub(crate) fn lib(&self) -> &Library {
        &self.lib
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn identity(&self) -> FileIdentity {
        self.identity
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn fapl(&self) -> &FileAccessProps {
        &self.fapl
    }

    /// The driver and allocator, or `BadArgs` once the file is shut down.
    pub(crate) fn io(&self) -> Result<MappedMutexGuard<'_, FileIo>> {
        MutexGuard::try_map(self.io.lock(), Option::as_mut)
            .map_err(|_| err!(BadArgs, "file {} is closed", self.path.display()))
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<u64> {
        self.root
            .lock()
            .links
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.addr)
    }

    /// Bind `name` to the header at `addr` and persist the root header.
    pub(crate) fn link(&self, name: &str, addr: u64) -> Result<()> {
        let mut root = self.root.lock();
        if root.links.iter().any(|l| l.name == name) {
            bail!(AlreadyExists, "dataset {name:?} already exists");
        }
        root.links.push(HardLink {
            name: name.to_string(),
            addr,
        });
        let msgs = root.messages();
        let mut io = self.io()?;
        let written = root.header.rewrite(&mut io, &msgs);
        if written.is_err() {
            root.links.pop();
        }
        written
    }

    pub(crate) fn unlink(&self, name: &str) -> Result<u64> {
        if !self.writable {
            bail!(ReadOnly, "file is opened read-only");
        }
        let mut root = self.root.lock();
        let pos = root
            .links
            .iter()
            .position(|l| l.name == name)
            .ok_or_else(|| err!(NotFound, "no dataset named {name:?}"))?;
        let link = root.links.remove(pos);
        root.dirty = true;
        Ok(link.addr)
    }

    fn names(&self) -> Vec<String> {
        self.root.lock().links.iter().map(|l| l.name.clone()).collect()
    }

    /// Write the root header, superblock and driver buffers.
    fn flush_metadata(root: &mut RootGroup, io: &mut FileIo) -> Result<()> {
        if root.dirty {
            let msgs = root.messages();
            root.header.rewrite(io, &msgs)?;
            root.dirty = false;
        }
        io.write_superblock(root.header.addr)?;
        io.flush_driver()
    }

    /// Flush every open dataset in the file, then the file itself.
    pub(crate) fn flush(&self) -> Result<()> {
        let datasets = self.lib.registry().datasets_in(self.identity);
        let mut first = None;
        for ds in datasets {
            if let Err(e) = ds.flush() {
                warn!(path = %self.path.display(), error = %e, "dataset flush failed");
                first.get_or_insert(e);
            }
        }
        if let Some(e) = first {
            return Err(e);
        }
        if !self.writable {
            return Ok(());
        }
        let mut root = self.root.lock();
        let mut io = self.io()?;
        Self::flush_metadata(&mut root, &mut io)?;
        io.driver.truncate(false).within(Component::Vfd)
    }

    /// Write out the metadata and release the driver. Idempotent.
    fn shutdown(&self) -> Result<()> {
        let Some(mut io) = self.io.lock().take() else {
            return Ok(());
        };
        let mut first: Option<Error> = None;
        let mut note = |r: Result<()>, what: &str| {
            if let Err(e) = r {
                if first.is_some() {
                    warn!(path = %self.path.display(), error = %e, "{what} failed during close");
                } else {
                    first = Some(e);
                }
            }
        };
        if self.writable {
            note(
                Self::flush_metadata(&mut self.root.lock(), &mut io),
                "metadata flush",
            );
            note(io.driver.truncate(true).within(Component::Vfd), "truncate");
        }
        let mut driver = io.driver;
        if self.locked {
            note(driver.unlock().within(Component::Vfd), "unlock");
        }
        note(driver.close().within(Component::Vfd), "driver close");
        debug!(path = %self.path.display(), "file closed");
        first.map_or(Ok(()), Err)
    }
}

impl Drop for FileShared {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(path = %self.path.display(), error = %e, "closing file on drop failed");
        }
    }
}

impl fmt::Debug for FileShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileShared")
            .field("path", &self.path)
            .field("identity", &self.identity)
            .field("writable", &self.writable)
            .finish_non_exhaustive()
    }
}

/// A handle to an open file.
///
/// Handles are cheap to clone. The file is closed when the last handle and
/// the last dataset opened from it are gone.
#[derive(Clone)]
pub struct File {
    shared: Arc<FileShared>,
}

impl File {
    /// Create (or truncate) a file through the global library.
    pub fn create(path: impl AsRef<Path>) -> Result<File> {
        Library::global().create_file(path, &FileAccessProps::default())
    }

    pub fn create_with(path: impl AsRef<Path>, fapl: &FileAccessProps) -> Result<File> {
        Library::global().create_file(path, fapl)
    }

    /// Open an existing file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<File> {
        Library::global().open_file(path, OpenMode::ReadOnly, &FileAccessProps::default())
    }

    /// Open an existing file for reading and writing.
    pub fn open_rw(path: impl AsRef<Path>) -> Result<File> {
        Library::global().open_file(path, OpenMode::ReadWrite, &FileAccessProps::default())
    }

    pub fn open_with(path: impl AsRef<Path>, mode: OpenMode, fapl: &FileAccessProps) -> Result<File> {
        Library::global().open_file(path, mode, fapl)
    }

    /// Remove a file from disk. It must not be open.
    pub fn delete(path: impl AsRef<Path>) -> Result<()> {
        Sec2Driver::delete(path).within(Component::Vfd)
    }

    pub(crate) fn from_shared(shared: Arc<FileShared>) -> File {
        File { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<FileShared> {
        &self.shared
    }

    pub fn library(&self) -> &Library {
        self.shared.lib()
    }

    pub fn path(&self) -> &Path {
        self.shared.path()
    }

    pub fn is_writable(&self) -> bool {
        self.shared.writable
    }

    /// Identity of the underlying file; equal for every path reaching it.
    pub fn identity(&self) -> FileIdentity {
        self.shared.identity
    }

    /// End of allocated space.
    pub fn eoa(&self) -> Result<u64> {
        Ok(self.shared.io()?.space.eoa())
    }

    /// Physical end of file.
    pub fn eof(&self) -> Result<u64> {
        Ok(self.shared.io()?.driver.get_eof())
    }

    /// Names in the root table, in creation order.
    pub fn dataset_names(&self) -> Vec<String> {
        self.shared.names()
    }

    /// Remove a name. The dataset's storage is not reclaimed.
    pub fn unlink(&self, name: &str) -> Result<()> {
        let _api = self.shared.lib().api_guard();
        let name = normalize_name(name)?;
        self.shared.unlink(name).map(|_| ())
    }

    pub fn flush(&self) -> Result<()> {
        let _api = self.shared.lib().api_guard();
        self.shared.flush()
    }

    /// Flush and drop this handle. The file closes once nothing else uses it.
    pub fn close(self) -> Result<()> {
        let lib = self.shared.lib().clone();
        let _api = lib.api_guard();
        self.shared.flush()?;
        match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared.shutdown(),
            Err(_) => Ok(()),
        }
    }

    pub fn create_dataset(
        &self,
        name: &str,
        dtype: &Datatype,
        space: &Dataspace,
        dcpl: &DatasetCreateProps,
    ) -> Result<Dataset> {
        self.create_dataset_with(name, dtype, space, dcpl, &DatasetAccessProps::default())
    }

    pub fn create_dataset_with(
        &self,
        name: &str,
        dtype: &Datatype,
        space: &Dataspace,
        dcpl: &DatasetCreateProps,
        dapl: &DatasetAccessProps,
    ) -> Result<Dataset> {
        let _api = self.shared.lib().api_guard();
        Dataset::create(self, name, dtype, space, dcpl, dapl)
    }

    pub fn open_dataset(&self, name: &str) -> Result<Dataset> {
        self.open_dataset_with(name, &DatasetAccessProps::default())
    }

    pub fn open_dataset_with(&self, name: &str, dapl: &DatasetAccessProps) -> Result<Dataset> {
        let _api = self.shared.lib().api_guard();
        Dataset::open(self, name, dapl)
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("path", &self.shared.path)
            .field("writable", &self.shared.writable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;

    fn lib() -> Library {
        Library::new(LibraryConfig::new().file_locking(FileLocking::BestEffort))
    }

    #[test]
    fn names_are_flat() {
        assert_eq!(normalize_name("/a").unwrap(), "a");
        assert_eq!(normalize_name("b").unwrap(), "b");
        assert_eq!(
            normalize_name("/").unwrap_err().kind(),
            crate::ErrorKind::BadArgs
        );
        assert_eq!(
            normalize_name("/g/x").unwrap_err().kind(),
            crate::ErrorKind::NotFound
        );
    }

    #[test]
    fn empty_file_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.h5");
        let lib = lib();
        let file = lib.create_file(&path, &FileAccessProps::default()).unwrap();
        assert!(file.dataset_names().is_empty());
        let eoa = file.eoa().unwrap();
        assert!(eoa > SUPERBLOCK_V2_SIZE as u64);
        file.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), eoa);

        let file = lib
            .open_file(&path, OpenMode::ReadOnly, &FileAccessProps::default())
            .unwrap();
        assert_eq!(file.eoa().unwrap(), eoa);
        assert!(!file.is_writable());
    }

    #[test]
    fn second_open_shares_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.h5");
        let lib = lib();
        let a = lib.create_file(&path, &FileAccessProps::default()).unwrap();
        let b = lib
            .open_file(&path, OpenMode::ReadWrite, &FileAccessProps::default())
            .unwrap();
        assert!(Arc::ptr_eq(a.shared(), b.shared()));
        assert_eq!(lib.open_files(), 1);
        let err = lib.create_file(&path, &FileAccessProps::default()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::OpenFailed);
    }

    #[test]
    fn closing_the_file_leaves_open_datasets_usable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outlive.h5");
        let lib = lib();
        let file = lib.create_file(&path, &FileAccessProps::default()).unwrap();
        let ds = file
            .create_dataset(
                "d",
                &Datatype::integer(4, true, h5core_format::datatype::Endian::Little),
                &Dataspace::simple(&[4]),
                &DatasetCreateProps::new(),
            )
            .unwrap();
        file.close().unwrap();
        assert_eq!(lib.open_files(), 1);

        ds.write(&[1i32, 2, 3, 4]).unwrap();
        ds.close().unwrap();
        assert_eq!(lib.open_files(), 0);

        let file = lib
            .open_file(&path, OpenMode::ReadOnly, &FileAccessProps::default())
            .unwrap();
        let ds = file.open_dataset("d").unwrap();
        assert_eq!(ds.read::<i32>().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn garbage_is_not_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.h5");
        std::fs::write(&path, vec![7u8; 100]).unwrap();
        let err = lib()
            .open_file(&path, OpenMode::ReadOnly, &FileAccessProps::default())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::OpenFailed);
    }
}
