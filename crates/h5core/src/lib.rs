//! Dataset engine for a hierarchical scientific-data container.
//!
//! A [`File`] holds a flat table of named datasets. Each [`Dataset`] is an
//! n-dimensional array of fixed-size elements with a datatype, a current
//! and a maximum extent, and one of four storage layouts: compact (inside
//! the object header), contiguous (one block, optionally in external
//! files), chunked (tiles passed through a filter pipeline and cached) or
//! virtual (elements mapped from other datasets).
//!
//! # Example
//!
//! ```no_run
//! use h5core::{Dataspace, DatasetCreateProps, Datatype, Endian, File, Selection};
//!
//! let file = File::create("grid.h5").unwrap();
//! let dcpl = DatasetCreateProps::new().chunk(&[10, 10]).deflate(6);
//! let ds = file
//!     .create_dataset(
//!         "grid",
//!         &Datatype::integer(4, true, Endian::Little),
//!         &Dataspace::simple(&[100, 100]),
//!         &dcpl,
//!     )
//!     .unwrap();
//! ds.write_selection(&Selection::block(&[0, 0], &[2, 3]), &[1i32, 2, 3, 4, 5, 6])
//!     .unwrap();
//! let corner: Vec<i32> = ds.read_selection(&Selection::block(&[0, 0], &[2, 3])).unwrap();
//! assert_eq!(corner, [1, 2, 3, 4, 5, 6]);
//! ds.close().unwrap();
//! file.close().unwrap();
//! ```
//!
//! Library-wide settings come from [`LibraryConfig`], which
//! [`Library::global`] reads from the environment (`HDF5_USE_FILE_LOCKING`,
//! `HDF5_EXTFILE_PREFIX`, `HDF5_VDS_PREFIX`, `HDF5_DRIVER`).

pub mod config;
pub mod context;
pub mod convert;
pub mod dataset;
pub mod error;
pub mod file;
pub mod fill;
mod header;
pub mod layout;
pub mod props;
mod registry;
pub mod selection;
pub mod types;

pub use config::{FileLocking, LibVer, LibraryConfig};
pub use context::{IoCtx, Library};
pub use dataset::Dataset;
pub use error::{Component, Error, ErrorKind, Result};
pub use file::{File, OpenMode};
pub use fill::FillValue;
pub use layout::chunked::{ChunkRecord, IndexKind};
pub use props::{
    AllocTime, AppendFlush, ChunkCacheConfig, DatasetAccessProps, DatasetCreateProps, Driver,
    ExternalFile, FileAccessProps, FillTime, LayoutKind, VdsView, VirtualMapping,
};
pub use registry::DatasetId;
pub use types::Element;

pub use h5core_format::dataspace::{Dataspace, UNLIMITED};
pub use h5core_format::datatype::{Datatype, Endian};
pub use h5core_format::selection::{HyperslabDim, Selection};
pub use h5core_format::vds::SAME_FILE;
pub use h5core_io::{FileIdentity, IoMode};
