//! Object header message type identifiers.

/// Header message types the dataset engine reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Nil,
    Dataspace,
    Datatype,
    FillValueOld,
    FillValue,
    Link,
    ExternalFileList,
    DataLayout,
    FilterPipeline,
    Attribute,
    Continuation,
    ModificationTimeOld,
    ModificationTime,
    /// Any other message type, kept verbatim.
    Unknown(u16),
}

impl MessageType {
    /// Convert a raw type id.
    pub fn from_u16(val: u16) -> MessageType {
        match val {
            0x0000 => MessageType::Nil,
            0x0001 => MessageType::Dataspace,
            0x0003 => MessageType::Datatype,
            0x0004 => MessageType::FillValueOld,
            0x0005 => MessageType::FillValue,
            0x0006 => MessageType::Link,
            0x0007 => MessageType::ExternalFileList,
            0x0008 => MessageType::DataLayout,
            0x000B => MessageType::FilterPipeline,
            0x000C => MessageType::Attribute,
            0x000E => MessageType::ModificationTimeOld,
            0x0010 => MessageType::Continuation,
            0x0012 => MessageType::ModificationTime,
            other => MessageType::Unknown(other),
        }
    }

    /// Convert back to the raw type id.
    pub fn to_u16(self) -> u16 {
        match self {
            MessageType::Nil => 0x0000,
            MessageType::Dataspace => 0x0001,
            MessageType::Datatype => 0x0003,
            MessageType::FillValueOld => 0x0004,
            MessageType::FillValue => 0x0005,
            MessageType::Link => 0x0006,
            MessageType::ExternalFileList => 0x0007,
            MessageType::DataLayout => 0x0008,
            MessageType::FilterPipeline => 0x000B,
            MessageType::Attribute => 0x000C,
            MessageType::ModificationTimeOld => 0x000E,
            MessageType::Continuation => 0x0010,
            MessageType::ModificationTime => 0x0012,
            MessageType::Unknown(v) => v,
        }
    }
}

/// Message flag: the message content never changes.
pub const MSG_FLAG_CONSTANT: u8 = 0x01;
/// Message flag: readers that do not understand the type must fail.
pub const MSG_FLAG_FAIL_IF_UNKNOWN: u8 = 0x08;
