//! The library context, and the view of a file that layouts do I/O through.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use h5core_filters::FilterRegistry;
use parking_lot::{Mutex, MutexGuard, ReentrantMutex, ReentrantMutexGuard};

use crate::config::LibraryConfig;
use crate::dataset::DatasetShared;
use crate::error::Result;
use crate::file::{File, FileIo, FileShared, OpenMode};
use crate::props::FileAccessProps;
use crate::registry::Registry;

/// Process-level state: configuration, the open-file table and the
/// open-dataset registry.
///
/// Cloning is cheap; clones share everything. Most programs use
/// [`Library::global`], which reads its configuration from the environment
/// on first use.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

struct LibraryInner {
    config: LibraryConfig,
    filters: FilterRegistry,
    files: Mutex<Vec<Weak<FileShared>>>,
    registry: Mutex<Registry<Arc<DatasetShared>>>,
    api: ReentrantMutex<()>,
}

impl Library {
    /// A library with the built-in filters.
    pub fn new(config: LibraryConfig) -> Library {
        Library::with_filters(config, FilterRegistry::with_builtins())
    }

    pub fn with_filters(config: LibraryConfig, filters: FilterRegistry) -> Library {
        Library {
            inner: Arc::new(LibraryInner {
                config,
                filters,
                files: Mutex::new(Vec::new()),
                registry: Mutex::new(Registry::new()),
                api: ReentrantMutex::new(()),
            }),
        }
    }

    /// The process-wide library, configured from the environment.
    pub fn global() -> &'static Library {
        static GLOBAL: OnceLock<Library> = OnceLock::new();
        GLOBAL.get_or_init(|| Library::new(LibraryConfig::from_env()))
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.inner.config
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.inner.filters
    }

    /// Create (or truncate) a file.
    pub fn create_file(&self, path: impl AsRef<Path>, fapl: &FileAccessProps) -> Result<File> {
        let _api = self.api_guard();
        FileShared::create(self, path.as_ref(), fapl).map(File::from_shared)
    }

    /// Open an existing file. A file that is already open is shared.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        mode: OpenMode,
        fapl: &FileAccessProps,
    ) -> Result<File> {
        let _api = self.api_guard();
        FileShared::open(self, path.as_ref(), mode, fapl).map(File::from_shared)
    }

    /// Datasets with at least one live handle (or closing).
    pub fn open_datasets(&self) -> usize {
        self.registry().len()
    }

    /// Files currently open through this library.
    pub fn open_files(&self) -> usize {
        self.files().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, Registry<Arc<DatasetShared>>> {
        self.inner.registry.lock()
    }

    pub(crate) fn files(&self) -> MutexGuard<'_, Vec<Weak<FileShared>>> {
        self.inner.files.lock()
    }

    /// Serializes public entry points when the API lock is configured.
    pub(crate) fn api_guard(&self) -> Option<ReentrantMutexGuard<'_, ()>> {
        self.inner.config.api_lock.then(|| self.inner.api.lock())
    }
}

impl fmt::Debug for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Library")
            .field("config", &self.inner.config)
            .field("filters", &self.inner.filters)
            .finish_non_exhaustive()
    }
}

/// Everything a layout needs from the file it lives in.
///
/// Each call takes the file's I/O lock for its own duration only.
#[derive(Clone, Copy)]
pub struct IoCtx<'a> {
    file: &'a Arc<FileShared>,
}

impl<'a> IoCtx<'a> {
    pub(crate) fn new(file: &'a Arc<FileShared>) -> IoCtx<'a> {
        IoCtx { file }
    }

    pub(crate) fn file(&self) -> &'a Arc<FileShared> {
        self.file
    }

    pub fn lib(&self) -> &'a Library {
        self.file.lib()
    }

    pub fn filters(&self) -> &'a FilterRegistry {
        self.file.lib().filters()
    }

    /// Path the file was opened with.
    pub fn path(&self) -> &'a Path {
        self.file.path()
    }

    pub fn writable(&self) -> bool {
        self.file.is_writable()
    }

    pub(crate) fn with_io<R>(&self, f: impl FnOnce(&mut FileIo) -> Result<R>) -> Result<R> {
        let mut io = self.file.io()?;
        f(&mut io)
    }

    pub fn read(&self, addr: u64, buf: &mut [u8]) -> Result<()> {
        self.with_io(|io| io.read(addr, buf))
    }

    pub fn read_vec(&self, addr: u64, len: usize) -> Result<Vec<u8>> {
        self.with_io(|io| io.read_vec(addr, len))
    }

    pub fn write(&self, addr: u64, data: &[u8]) -> Result<()> {
        self.with_io(|io| io.write(addr, data))
    }

    /// Reserve `size` bytes of file space.
    pub fn alloc(&self, size: u64) -> Result<u64> {
        self.with_io(|io| io.alloc(size))
    }

    pub fn free(&self, addr: u64, size: u64) -> Result<()> {
        self.with_io(|io| io.free(addr, size))
    }

    /// Resize a block; the contents are not carried over when it moves.
    pub fn realloc(&self, addr: u64, old: u64, new: u64) -> Result<u64> {
        self.with_io(|io| io.realloc(addr, old, new))
    }
}

impl fmt::Debug for IoCtx<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoCtx").field("path", &self.path()).finish()
    }
}
