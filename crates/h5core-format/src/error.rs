//! Error type for message decoding and encoding.

use core::fmt;

/// Errors raised while decoding or encoding on-disk structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// Unexpected end of data.
    UnexpectedEof {
        /// Number of bytes expected.
        expected: usize,
        /// Number of bytes actually available.
        available: usize,
    },
    /// A structure signature (e.g. `OHDR`, `TREE`) did not match.
    InvalidSignature(&'static str),
    /// A structure carries a version this crate cannot handle.
    UnsupportedVersion {
        /// Which structure.
        what: &'static str,
        /// The version found.
        version: u8,
    },
    /// Invalid offset size (must be 1, 2, 4, or 8).
    InvalidOffsetSize(u8),
    /// Invalid length size (must be 2, 4, or 8).
    InvalidLengthSize(u8),
    /// Unknown datatype class.
    InvalidDatatypeClass(u8),
    /// Datatype class and version combination is not valid.
    InvalidDatatypeVersion {
        /// Datatype class.
        class: u8,
        /// Encoded version.
        version: u8,
    },
    /// Unknown layout class.
    InvalidLayoutClass(u8),
    /// Unknown chunk index type in a v4 layout message.
    InvalidChunkIndexType(u8),
    /// Unknown dataspace type.
    InvalidDataspaceType(u8),
    /// Rank exceeds the maximum supported by the format.
    RankTooLarge(usize),
    /// A field holds a value outside its legal domain.
    InvalidField {
        /// Which field.
        what: &'static str,
        /// The offending value.
        value: u64,
    },
    /// Unknown message type that is marked as must-understand.
    UnsupportedMessage(u16),
    /// Lookup3 checksum mismatch.
    ChecksumMismatch {
        /// The checksum stored in the file.
        expected: u32,
        /// The checksum we computed.
        computed: u32,
    },
    /// An encoded message does not fit in its size field.
    MessageTooLarge(usize),
}

impl FormatError {
    /// `true` when the bytes are well formed but use a feature not handled here.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            FormatError::UnsupportedVersion { .. } | FormatError::UnsupportedMessage(_)
        )
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::UnexpectedEof {
                expected,
                available,
            } => {
                write!(f, "unexpected EOF: need {expected} bytes, have {available}")
            }
            FormatError::InvalidSignature(sig) => write!(f, "invalid {sig} signature"),
            FormatError::UnsupportedVersion { what, version } => {
                write!(f, "unsupported {what} version: {version}")
            }
            FormatError::InvalidOffsetSize(s) => {
                write!(f, "invalid offset size: {s} (must be 1, 2, 4, or 8)")
            }
            FormatError::InvalidLengthSize(s) => {
                write!(f, "invalid length size: {s} (must be 2, 4, or 8)")
            }
            FormatError::InvalidDatatypeClass(c) => write!(f, "invalid datatype class: {c}"),
            FormatError::InvalidDatatypeVersion { class, version } => {
                write!(f, "invalid version {version} for datatype class {class}")
            }
            FormatError::InvalidLayoutClass(c) => write!(f, "invalid layout class: {c}"),
            FormatError::InvalidChunkIndexType(t) => write!(f, "invalid chunk index type: {t}"),
            FormatError::InvalidDataspaceType(t) => write!(f, "invalid dataspace type: {t}"),
            FormatError::RankTooLarge(r) => write!(f, "rank {r} exceeds the maximum of 32"),
            FormatError::InvalidField { what, value } => {
                write!(f, "invalid {what}: {value}")
            }
            FormatError::UnsupportedMessage(id) => {
                write!(
                    f,
                    "unsupported message type {id:#06x} marked as must-understand"
                )
            }
            FormatError::ChecksumMismatch { expected, computed } => {
                write!(
                    f,
                    "checksum mismatch: expected {expected:#010x}, computed {computed:#010x}"
                )
            }
            FormatError::MessageTooLarge(n) => {
                write!(f, "encoded message of {n} bytes exceeds the 65535 byte limit")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FormatError {}
