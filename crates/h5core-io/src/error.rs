//! Errors raised by file drivers and the space allocator.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;

pub type Result<T, E = VfdError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum VfdError {
    #[error("invalid argument: {0}")]
    BadArgs(&'static str),

    #[error("{what}: address {addr:#x} is past the limit {limit:#x}")]
    BadRange {
        what: &'static str,
        addr: u64,
        limit: u64,
    },

    #[error("unable to open file {}: {source}", path.display())]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file read failed at {addr:#x}: {source}")]
    ReadError {
        addr: u64,
        #[source]
        source: io::Error,
    },

    #[error("file write failed at {addr:#x}: {source}")]
    WriteError {
        addr: u64,
        #[source]
        source: io::Error,
    },

    #[error("unable to seek to {addr:#x}: {source}")]
    SeekError {
        addr: u64,
        #[source]
        source: io::Error,
    },

    #[error("unable to resize file to {len:#x}: {source}")]
    Truncate {
        len: u64,
        #[source]
        source: io::Error,
    },

    #[error("unable to sync file to storage: {0}")]
    SyncFailed(#[source] io::Error),

    #[error("address {addr:#x} with length {len} overflows the address space")]
    Overflow { addr: u64, len: u64 },

    #[error("address is undefined")]
    AddrUndefined,

    #[error("unable to lock file: {0}")]
    LockUnavailable(Errno),

    #[error("unable to close file: {0}")]
    CloseFailed(Errno),

    #[error("no space left for {requested} bytes below {maxaddr:#x}")]
    OutOfSpace { requested: u64, maxaddr: u64 },

    #[error("unable to delete {}: {source}", path.display())]
    DeleteFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl VfdError {
    /// OS error number behind this error, when there is one.
    pub fn errno(&self) -> Option<i32> {
        match self {
            VfdError::OpenFailed { source, .. }
            | VfdError::ReadError { source, .. }
            | VfdError::WriteError { source, .. }
            | VfdError::SeekError { source, .. }
            | VfdError::Truncate { source, .. }
            | VfdError::DeleteFailed { source, .. } => source.raw_os_error(),
            VfdError::SyncFailed(source) => source.raw_os_error(),
            VfdError::LockUnavailable(e) | VfdError::CloseFailed(e) => Some(*e as i32),
            _ => None,
        }
    }
}
