//! Error type for the dataset engine.
//!
//! Low-level errors from the driver, codec and filter crates convert into
//! [`Error`] and are usually wrapped with the [`Component`] that was running
//! when they surfaced. [`Error::kind`] looks through those wrappers.

use std::fmt;

use h5core_filters::FilterError;
use h5core_format::FormatError;
use h5core_io::VfdError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Coarse classification of every error the library reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadArgs,
    BadType,
    BadLayout,
    BadRange,
    BadValue,
    Overflow,
    NotFound,
    AlreadyExists,
    ReadOnly,
    OpenFailed,
    CloseFailed,
    ReadError,
    WriteError,
    SeekError,
    LockUnavailable,
    FilterFailed,
    OutOfSpace,
    Corrupt,
    Unsupported,
    AddrUndefined,
}

/// The part of the library an error passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Dataset,
    Layout,
    Pipeline,
    Vfd,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Dataset => "dataset",
            Component::Layout => "layout",
            Component::Pipeline => "pipeline",
            Component::Vfd => "file driver",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{message}")]
    Api { kind: ErrorKind, message: String },

    #[error(transparent)]
    Vfd(#[from] VfdError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("{component}: {source}")]
    Context {
        component: Component,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Error {
        Error::Api {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Api { kind, .. } => *kind,
            Error::Vfd(e) => vfd_kind(e),
            Error::Format(e) if e.is_unsupported() => ErrorKind::Unsupported,
            Error::Format(_) => ErrorKind::Corrupt,
            Error::Filter(e) => match e {
                FilterError::NotFound { .. } => ErrorKind::NotFound,
                FilterError::CannotApply { .. } => ErrorKind::BadType,
                FilterError::Failed { .. } => ErrorKind::FilterFailed,
                FilterError::TooManyFilters(_) => ErrorKind::BadArgs,
            },
            Error::Context { source, .. } => source.kind(),
        }
    }

    /// Innermost component this error passed through, if any was recorded.
    pub fn component(&self) -> Option<Component> {
        match self {
            Error::Context { component, source } => source.component().or(Some(*component)),
            _ => None,
        }
    }

    pub(crate) fn within(self, component: Component) -> Error {
        Error::Context {
            component,
            source: Box::new(self),
        }
    }
}

fn vfd_kind(e: &VfdError) -> ErrorKind {
    match e {
        VfdError::BadArgs(_) => ErrorKind::BadArgs,
        VfdError::BadRange { .. } => ErrorKind::BadRange,
        VfdError::OpenFailed { .. } => ErrorKind::OpenFailed,
        VfdError::ReadError { .. } => ErrorKind::ReadError,
        VfdError::WriteError { .. } | VfdError::Truncate { .. } | VfdError::SyncFailed(_) => {
            ErrorKind::WriteError
        }
        VfdError::SeekError { .. } => ErrorKind::SeekError,
        VfdError::Overflow { .. } => ErrorKind::Overflow,
        VfdError::AddrUndefined => ErrorKind::AddrUndefined,
        VfdError::LockUnavailable(_) => ErrorKind::LockUnavailable,
        VfdError::CloseFailed(_) => ErrorKind::CloseFailed,
        VfdError::OutOfSpace { .. } => ErrorKind::OutOfSpace,
        VfdError::DeleteFailed { .. } => ErrorKind::WriteError,
    }
}

/// Attach a [`Component`] to any error convertible into [`Error`].
pub(crate) trait ResultExt<T> {
    fn within(self, component: Component) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn within(self, component: Component) -> Result<T> {
        self.map_err(|e| e.into().within(component))
    }
}

/// Shorthand for returning an [`Error::Api`].
macro_rules! bail {
    ($kind:ident, $($arg:tt)+) => {
        return Err($crate::error::Error::new(
            $crate::error::ErrorKind::$kind,
            format!($($arg)+),
        ))
    };
}

macro_rules! err {
    ($kind:ident, $($arg:tt)+) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)+))
    };
}

pub(crate) use {bail, err};
