//! Library-wide configuration.
//!
//! [`LibraryConfig`] is read once per [`Library`](crate::Library), normally
//! from the process environment. Per-file and per-dataset settings live in
//! [`props`](crate::props) and override what is configured here.

use std::path::PathBuf;

use tracing::warn;

/// Lower bound on the format versions written.
///
/// Each message type has a version chosen from the low bound; raising it
/// unlocks newer encodings (v2 object headers, v4 layouts) at the cost of
/// compatibility with older readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum LibVer {
    /// Oldest encodings every reader understands.
    #[default]
    Earliest,
    V18,
    V110,
    V112,
    Latest,
}

impl LibVer {
    pub fn object_header_version(self) -> u8 {
        if self == LibVer::Earliest {
            1
        } else {
            2
        }
    }

    pub fn layout_version(self) -> u8 {
        if self >= LibVer::V110 {
            4
        } else {
            3
        }
    }

    pub fn fill_version(self) -> u8 {
        if self == LibVer::Earliest {
            2
        } else {
            3
        }
    }

    pub fn pipeline_version(self) -> u8 {
        if self == LibVer::Earliest {
            1
        } else {
            2
        }
    }

    pub fn dataspace_version(self) -> u8 {
        if self == LibVer::Earliest {
            1
        } else {
            2
        }
    }

    /// Smallest datatype message version to encode with.
    pub fn datatype_floor(self) -> u8 {
        if self == LibVer::Earliest {
            1
        } else {
            3
        }
    }

    fn parse(s: &str) -> Option<LibVer> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Some(LibVer::Earliest),
            "v18" => Some(LibVer::V18),
            "v110" => Some(LibVer::V110),
            "v112" => Some(LibVer::V112),
            "latest" => Some(LibVer::Latest),
            _ => None,
        }
    }
}

/// Advisory file locking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileLocking {
    Disabled,
    /// Lock, and fail when the filesystem has locking disabled.
    #[default]
    Enabled,
    /// Lock, but carry on when the filesystem has locking disabled.
    BestEffort,
}

impl FileLocking {
    fn parse(s: &str) -> Option<FileLocking> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FALSE" | "0" => Some(FileLocking::Disabled),
            "TRUE" | "1" => Some(FileLocking::Enabled),
            "BEST_EFFORT" => Some(FileLocking::BestEffort),
            _ => None,
        }
    }
}

/// Process-level settings, normally taken from the environment.
#[derive(Debug, Clone, Default)]
pub struct LibraryConfig {
    /// `HDF5_USE_FILE_LOCKING`.
    pub file_locking: FileLocking,
    /// `HDF5_EXTFILE_PREFIX`: directory searched for external raw-data files.
    pub efile_prefix: Option<String>,
    /// `HDF5_VDS_PREFIX`: directory searched for virtual dataset sources.
    pub vds_prefix: Option<String>,
    /// Serialize public entry points on one reentrant lock.
    pub api_lock: bool,
    /// `HDF5_DRIVER`. Recorded for test harnesses; the core does not act on it.
    pub driver: Option<String>,
    /// `HDF5_LIBVER_BOUNDS`. Recorded for test harnesses; the core does not act on it.
    pub libver_bounds: Option<LibVer>,
}

impl LibraryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = LibraryConfig::default();
        if let Some(v) = lookup("HDF5_USE_FILE_LOCKING") {
            match FileLocking::parse(&v) {
                Some(locking) => config.file_locking = locking,
                None => warn!(value = %v, "ignoring unrecognized HDF5_USE_FILE_LOCKING"),
            }
        }
        config.efile_prefix = lookup("HDF5_EXTFILE_PREFIX").filter(|s| !s.is_empty());
        config.vds_prefix = lookup("HDF5_VDS_PREFIX").filter(|s| !s.is_empty());
        config.driver = lookup("HDF5_DRIVER").filter(|s| !s.is_empty());
        config.libver_bounds = lookup("HDF5_LIBVER_BOUNDS").and_then(|v| {
            // "low,high"; only the low bound matters.
            let low = v.split(',').next().unwrap_or_default();
            LibVer::parse(low)
        });
        config
    }

    pub fn file_locking(mut self, locking: FileLocking) -> Self {
        self.file_locking = locking;
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

    pub fn api_lock(mut self, enabled: bool) -> Self {
        self.api_lock = enabled;
        self
    }
}

/// Expand `${ORIGIN}` in a search prefix to the directory holding `file`.
pub(crate) fn expand_origin(prefix: &str, file: &std::path::Path) -> PathBuf {
    if prefix.contains("${ORIGIN}") {
        let origin = file
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let origin = if origin.is_empty() { ".".to_string() } else { origin };
        PathBuf::from(prefix.replace("${ORIGIN}", &origin))
    } else {
        PathBuf::from(prefix)
    }
}
