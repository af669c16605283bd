//! Property lists for creating and accessing datasets and files.
//!
//! Each struct is a typed snapshot of configuration. They are cheap to
//! clone, implement `Default`, and offer `mut self -> Self` builders.

use std::fmt;
use std::sync::Arc;

use h5core_filters::FILTER_IDENTITY;
use h5core_format::datatype::Datatype;
use h5core_format::filter_pipeline::{
    FilterDescription, FILTER_DEFLATE, FILTER_FLAG_OPTIONAL, FILTER_FLETCHER32, FILTER_SHUFFLE,
};
use h5core_format::vds::VdsMapping;
use h5core_io::IoMode;

pub use h5core_format::fill_value::FillTime;

use crate::config::{FileLocking, LibVer};
use crate::types::Element;

/// Raw-data storage strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutKind {
    /// Raw data stored inside the object header (at most 64 KiB).
    Compact,
    /// One block of file space.
    #[default]
    Contiguous,
    /// Fixed-size tiles, individually allocated and filtered.
    Chunked,
    /// Elements mapped from other datasets.
    Virtual,
}

/// When raw-data storage is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocTime {
    /// Pick per layout: compact is early, contiguous late, chunked and
    /// virtual incremental.
    #[default]
    Default,
    /// At creation and whenever the extent grows.
    Early,
    /// On the first write.
    Late,
    /// Chunk by chunk as they are written.
    Incremental,
}

/// One segment of an external raw-data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalFile {
    pub name: String,
    /// Byte offset of the segment inside the file.
    pub offset: u64,
    /// Segment length, or [`EFL_UNLIMITED`](h5core_format::external_file_list::EFL_UNLIMITED)
    /// for the last segment.
    pub size: u64,
}

/// A virtual dataset mapping: which source elements appear where.
pub type VirtualMapping = VdsMapping;

/// Dataset creation properties.
///
/// Everything here is persisted in the dataset's object header and
/// recovered by [`Dataset::create_props`](crate::Dataset::create_props).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetCreateProps {
    /// Storage layout.
    pub layout: LayoutKind,
    /// Tile shape for chunked storage.
    pub chunk_dims: Option<Vec<u64>>,
    /// User fill value, expressed in its own datatype.
    pub fill_value: Option<(Datatype, Vec<u8>)>,
    /// When fill values are written into newly allocated storage.
    pub fill_time: FillTime,
    /// When storage is allocated.
    pub alloc_time: AllocTime,
    /// Filter pipeline, applied in order when writing chunks.
    pub filters: Vec<FilterDescription>,
    /// External files holding contiguous raw data.
    pub external_files: Vec<ExternalFile>,
    /// Virtual dataset mappings.
    pub virtual_mappings: Vec<VirtualMapping>,
    /// Store chunks that extend past the extent without filtering them.
    pub dont_filter_partial_edge_chunks: bool,
    /// Size the object header to exactly its messages.
    pub minimize_header: bool,
}

impl DatasetCreateProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Use compact storage.
    pub fn compact(self) -> Self {
        self.layout(LayoutKind::Compact)
    }

    /// Use chunked storage with the given tile shape.
    pub fn chunk(mut self, dims: &[u64]) -> Self {
        self.layout = LayoutKind::Chunked;
        self.chunk_dims = Some(dims.to_vec());
        self
    }

    /// Append a filter to the pipeline.
    pub fn filter(mut self, id: u16, optional: bool, client_data: &[u32]) -> Self {
        self.filters.push(FilterDescription {
            id,
            name: None,
            flags: if optional { FILTER_FLAG_OPTIONAL } else { 0 },
            client_data: client_data.to_vec(),
        });
        self
    }

    /// Deflate compression level (0-9).
    pub fn deflate(self, level: u32) -> Self {
        self.filter(FILTER_DEFLATE, true, &[level])
    }

    /// Byte shuffle, usually placed before deflate.
    pub fn shuffle(self) -> Self {
        self.filter(FILTER_SHUFFLE, true, &[])
    }

    /// Fletcher32 checksum over each chunk.
    pub fn fletcher32(self) -> Self {
        self.filter(FILTER_FLETCHER32, false, &[])
    }

    /// The pass-through filter; handy for exercising the pipeline.
    pub fn identity_filter(self) -> Self {
        self.filter(FILTER_IDENTITY, false, &[])
    }

    /// Set a fill value of a native element type.
    pub fn fill_value<T: Element>(mut self, value: T) -> Self {
        self.fill_value = Some((T::datatype(), bytemuck::bytes_of(&value).to_vec()));
        self
    }

    /// Set a fill value given in an arbitrary datatype.
    pub fn fill_value_raw(mut self, dtype: Datatype, bytes: Vec<u8>) -> Self {
        self.fill_value = Some((dtype, bytes));
        self
    }

    pub fn fill_time(mut self, time: FillTime) -> Self {
        self.fill_time = time;
        self
    }

    pub fn alloc_time(mut self, time: AllocTime) -> Self {
        self.alloc_time = time;
        self
    }

    /// Store raw data in an external file segment. Implies contiguous layout.
    pub fn external(mut self, name: impl Into<String>, offset: u64, size: u64) -> Self {
        self.layout = LayoutKind::Contiguous;
        self.external_files.push(ExternalFile {
            name: name.into(),
            offset,
            size,
        });
        self
    }

    /// Add a virtual mapping. Implies virtual layout.
    pub fn virtual_mapping(mut self, mapping: VirtualMapping) -> Self {
        self.layout = LayoutKind::Virtual;
        self.virtual_mappings.push(mapping);
        self
    }

    pub fn dont_filter_partial_edge_chunks(mut self, enabled: bool) -> Self {
        self.dont_filter_partial_edge_chunks = enabled;
        self
    }

    pub fn minimize_header(mut self, enabled: bool) -> Self {
        self.minimize_header = enabled;
        self
    }
}

/// Chunk cache sizing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkCacheConfig {
    /// Hash slots; best as a prime well above the number of cached chunks.
    pub nslots: usize,
    /// Byte budget for decoded chunks.
    pub nbytes: usize,
    /// Eviction preference for fully accessed chunks, in `[0, 1]`.
    pub w0: f64,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            nslots: 521,
            nbytes: 1024 * 1024,
            w0: 0.75,
        }
    }
}

/// Callback run when an append-flush boundary is reached; receives the new dims.
pub type AppendFlushCallback = Arc<dyn Fn(&[u64]) + Send + Sync>;

/// Flush a dataset whenever a growing dimension reaches a multiple of its boundary.
#[derive(Clone, Default)]
pub struct AppendFlush {
    /// One entry per dimension; zero disables the dimension.
    pub boundary: Vec<u64>,
    pub callback: Option<AppendFlushCallback>,
}

impl fmt::Debug for AppendFlush {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppendFlush")
            .field("boundary", &self.boundary)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// How missing virtual sources affect reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VdsView {
    /// Stop at the first source that cannot be opened; later mappings read as fill.
    FirstMissing,
    /// Use every source that can be opened.
    #[default]
    LastAvailable,
}

/// Dataset access properties. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct DatasetAccessProps {
    pub chunk_cache: Option<ChunkCacheConfig>,
    pub append_flush: Option<AppendFlush>,
    pub vds_view: VdsView,
    /// Missing source files tolerated in printf-style mappings.
    pub vds_printf_gap: u64,
    /// Prefix for external raw-data file names; overrides `HDF5_EXTFILE_PREFIX`.
    pub efile_prefix: Option<String>,
    /// Prefix for virtual source file names; overrides `HDF5_VDS_PREFIX`.
    pub vds_prefix: Option<String>,
}

impl DatasetAccessProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_cache(mut self, config: ChunkCacheConfig) -> Self {
        self.chunk_cache = Some(config);
        self
    }

    pub fn append_flush(
        mut self,
        boundary: &[u64],
        callback: Option<AppendFlushCallback>,
    ) -> Self {
        self.append_flush = Some(AppendFlush {
            boundary: boundary.to_vec(),
            callback,
        });
        self
    }

    pub fn vds_view(mut self, view: VdsView) -> Self {
        self.vds_view = view;
        self
    }

    pub fn vds_printf_gap(mut self, gap: u64) -> Self {
        self.vds_printf_gap = gap;
        self
    }

    pub fn efile_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.efile_prefix = Some(prefix.into());
        self
    }

    pub fn vds_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.vds_prefix = Some(prefix.into());
        self
    }
}

/// Which file driver backs a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    /// POSIX file descriptor.
    #[default]
    Sec2,
    /// In-memory image, written to the path on flush when `backing_store` is set.
    Memory { backing_store: bool },
}

/// File access properties.
#[derive(Debug, Clone)]
pub struct FileAccessProps {
    /// Low bound for the format versions written.
    pub libver_bounds: LibVer,
    /// Sieve buffer size for contiguous raw data (default: 64 KiB).
    pub sieve_buf_size: usize,
    pub driver: Driver,
    /// Overrides the library-wide locking policy.
    pub file_locking: Option<FileLocking>,
    /// Overrides whether filesystems without lock support are tolerated.
    pub ignore_disabled_locks: Option<bool>,
    pub io_mode: IoMode,
    /// Default chunk cache for datasets opened in this file.
    pub chunk_cache: ChunkCacheConfig,
}

impl Default for FileAccessProps {
    fn default() -> Self {
        Self {
            libver_bounds: LibVer::Earliest,
            sieve_buf_size: 64 * 1024,
            driver: Driver::Sec2,
            file_locking: None,
            ignore_disabled_locks: None,
            io_mode: IoMode::Positional,
            chunk_cache: ChunkCacheConfig::default(),
        }
    }
}

impl FileAccessProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn libver_bounds(mut self, low: LibVer) -> Self {
        self.libver_bounds = low;
        self
    }

    pub fn sieve_buf_size(mut self, bytes: usize) -> Self {
        self.sieve_buf_size = bytes;
        self
    }

    pub fn driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    pub fn file_locking(mut self, locking: FileLocking) -> Self {
        self.file_locking = Some(locking);
        self
    }

    pub fn ignore_disabled_locks(mut self, ignore: bool) -> Self {
        self.ignore_disabled_locks = Some(ignore);
        self
    }

    pub fn io_mode(mut self, mode: IoMode) -> Self {
        self.io_mode = mode;
        self
    }

    pub fn chunk_cache(mut self, config: ChunkCacheConfig) -> Self {
        self.chunk_cache = config;
        self
    }
}
