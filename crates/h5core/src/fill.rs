//! Fill values: what unwritten storage reads as, and when it is written.

use h5core_format::datatype::Datatype;
use h5core_format::fill_value::{self, FillStatus, FillTime, FillValueMessage};

use crate::convert::convert;
use crate::error::{bail, Result};
use crate::props::{AllocTime, LayoutKind};

/// Fill state of one dataset, expressed in the dataset's datatype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValue {
    /// One element; present iff `status == UserDefined`.
    pub bytes: Option<Vec<u8>>,
    pub fill_time: FillTime,
    /// Always resolved; never [`AllocTime::Default`].
    pub alloc_time: AllocTime,
    pub status: FillStatus,
}

/// Allocation time a layout uses when none is requested.
pub fn default_alloc_time(layout: LayoutKind) -> AllocTime {
    match layout {
        LayoutKind::Compact => AllocTime::Early,
        LayoutKind::Contiguous => AllocTime::Late,
        LayoutKind::Chunked | LayoutKind::Virtual => AllocTime::Incremental,
    }
}

impl FillValue {
    /// Resolve creation settings against the dataset datatype.
    pub fn resolve(
        dtype: &Datatype,
        user: Option<&(Datatype, Vec<u8>)>,
        fill_time: FillTime,
        alloc_time: AllocTime,
        layout: LayoutKind,
    ) -> Result<FillValue> {
        let mut fill_time = fill_time;
        if dtype.has_vlen() {
            if fill_time == FillTime::Never {
                bail!(BadArgs, "fill time 'never' is not allowed with variable-length data");
            }
            fill_time = FillTime::OnAlloc;
        }
        let alloc_time = match alloc_time {
            AllocTime::Default => default_alloc_time(layout),
            t => t,
        };
        let (bytes, status) = match user {
            Some((src, value)) => {
                if value.len() != src.size() as usize {
                    bail!(
                        BadArgs,
                        "fill value has {} bytes, its datatype needs {}",
                        value.len(),
                        src.size()
                    );
                }
                (Some(convert(src, dtype, value)?), FillStatus::UserDefined)
            }
            None => (None, FillStatus::Default),
        };
        Ok(FillValue {
            bytes,
            fill_time,
            alloc_time,
            status,
        })
    }

    pub fn is_user_defined(&self) -> bool {
        self.status == FillStatus::UserDefined
    }

    /// Whether newly allocated storage receives the fill value.
    pub fn write_on_alloc(&self) -> bool {
        match self.fill_time {
            FillTime::OnAlloc => true,
            FillTime::IfSet => self.is_user_defined(),
            FillTime::Never => false,
        }
    }

    /// Fill `buf` with whole elements of the fill value (zeros by default).
    pub fn fill(&self, buf: &mut [u8]) {
        match &self.bytes {
            Some(pattern) if pattern.iter().any(|&b| b != 0) => {
                for elem in buf.chunks_mut(pattern.len()) {
                    elem.copy_from_slice(&pattern[..elem.len()]);
                }
            }
            _ => buf.fill(0),
        }
    }

    /// A buffer of `len` bytes holding the fill pattern.
    pub fn buffer(&self, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf);
        buf
    }

    pub(crate) fn to_message(&self) -> FillValueMessage {
        use h5core_format::fill_value::AllocTime as Stored;
        FillValueMessage {
            alloc_time: match self.alloc_time {
                AllocTime::Early => Stored::Early,
                AllocTime::Late => Stored::Late,
                AllocTime::Incremental | AllocTime::Default => Stored::Incremental,
            },
            fill_time: self.fill_time,
            status: self.status,
            value: self.bytes.clone(),
        }
    }

    /// Rebuild from the stored message, preferring the legacy value when the
    /// new message has none.
    pub(crate) fn from_message(msg: FillValueMessage, legacy: Option<Vec<u8>>) -> FillValue {
        use h5core_format::fill_value::AllocTime as Stored;
        let (bytes, status) = match (msg.value, legacy) {
            (Some(v), _) => (Some(v), FillStatus::UserDefined),
            (None, Some(v)) if msg.status != FillStatus::Undefined => {
                (Some(v), FillStatus::UserDefined)
            }
            (None, _) => (None, msg.status),
        };
        FillValue {
            bytes,
            fill_time: msg.fill_time,
            alloc_time: match msg.alloc_time {
                Stored::Early => AllocTime::Early,
                Stored::Late => AllocTime::Late,
                Stored::Incremental => AllocTime::Incremental,
            },
            status,
        }
    }

    /// Legacy fill message payload, written next to the new one by old-format headers.
    pub(crate) fn legacy_message(&self) -> Option<Vec<u8>> {
        self.bytes.as_deref().map(fill_value::encode_old)
    }
}
