//! The messages that make up a dataset's object header.

use h5core_format::data_layout::{DataLayout, LayoutMessage};
use h5core_format::dataspace::Dataspace;
use h5core_format::datatype::Datatype;
use h5core_format::external_file_list::ExternalFileListMessage;
use h5core_format::fill_value::{self, AllocTime as StoredAllocTime, FillStatus, FillTime, FillValueMessage};
use h5core_format::filter_pipeline::FilterPipelineMessage;
use h5core_format::message_type::{MessageType, MSG_FLAG_CONSTANT};
use h5core_format::modification_time;
use h5core_format::object_header::RawMessage;
use h5core_format::{LENGTH_SIZE, OFFSET_SIZE};

use crate::config::LibVer;
use crate::error::{bail, err, Component, Result, ResultExt};
use crate::fill::FillValue;

/// Everything the dataset engine keeps in a dataset header.
#[derive(Debug, Clone)]
pub(crate) struct DatasetMessages {
    pub space: Dataspace,
    pub dtype: Datatype,
    pub fill: FillValue,
    pub pipeline: FilterPipelineMessage,
    pub efl: Option<ExternalFileListMessage>,
    pub layout: LayoutMessage,
    pub mtime: Option<u32>,
}

/// Encode the messages in the order they are stored.
///
/// Version 1 headers carry the legacy fill message next to the new one and
/// record the modification time as a message.
pub(crate) fn encode(msgs: &DatasetMessages, libver: LibVer, header_version: u8) -> Result<Vec<RawMessage>> {
    let mut out = Vec::with_capacity(8);
    out.push(RawMessage::new(
        MessageType::Dataspace,
        msgs.space.encode(libver.dataspace_version(), LENGTH_SIZE),
    ));
    out.push(
        RawMessage::new(MessageType::Datatype, msgs.dtype.encode(libver.datatype_floor()))
            .with_flags(MSG_FLAG_CONSTANT),
    );
    if libver == LibVer::Earliest {
        if let Some(legacy) = msgs.fill.legacy_message() {
            out.push(RawMessage::new(MessageType::FillValueOld, legacy).with_flags(MSG_FLAG_CONSTANT));
        }
    }
    out.push(
        RawMessage::new(
            MessageType::FillValue,
            msgs.fill.to_message().encode(libver.fill_version()),
        )
        .with_flags(MSG_FLAG_CONSTANT),
    );
    if !msgs.pipeline.is_empty() {
        out.push(RawMessage::new(
            MessageType::FilterPipeline,
            msgs.pipeline.encode(libver.pipeline_version()),
        ));
    }
    if let Some(efl) = &msgs.efl {
        out.push(RawMessage::new(
            MessageType::ExternalFileList,
            efl.encode(OFFSET_SIZE, LENGTH_SIZE),
        ));
    }
    out.push(RawMessage::new(
        MessageType::DataLayout,
        msgs.layout.encode(OFFSET_SIZE, LENGTH_SIZE)?,
    ));
    if header_version == 1 {
        if let Some(seconds) = msgs.mtime {
            out.push(RawMessage::new(
                MessageType::ModificationTime,
                modification_time::encode(seconds),
            ));
        }
    }
    Ok(out)
}

/// Allocation time a header without a fill message implies for its layout.
fn implied_alloc_time(layout: &DataLayout) -> StoredAllocTime {
    match layout {
        DataLayout::Compact { .. } => StoredAllocTime::Early,
        DataLayout::Contiguous { .. } => StoredAllocTime::Late,
        DataLayout::Chunked { .. } | DataLayout::Virtual { .. } => StoredAllocTime::Incremental,
    }
}

/// Decode a dataset header. Unknown messages are ignored.
pub(crate) fn decode(raw: &[RawMessage]) -> Result<DatasetMessages> {
    let mut space = None;
    let mut dtype = None;
    let mut fill_msg = None;
    let mut legacy_fill = None;
    let mut pipeline = FilterPipelineMessage::default();
    let mut efl = None;
    let mut layout = None;
    let mut mtime = None;
    let mut mtime_old = None;
    for msg in raw {
        match msg.msg_type {
            MessageType::Dataspace => space = Some(Dataspace::decode(&msg.data, LENGTH_SIZE)?),
            MessageType::Datatype => dtype = Some(Datatype::decode(&msg.data)?.0),
            MessageType::FillValue => fill_msg = Some(FillValueMessage::decode(&msg.data)?),
            MessageType::FillValueOld => legacy_fill = fill_value::decode_old(&msg.data)?,
            MessageType::FilterPipeline => pipeline = FilterPipelineMessage::decode(&msg.data)?,
            MessageType::ExternalFileList => {
                efl = Some(ExternalFileListMessage::decode(&msg.data, OFFSET_SIZE, LENGTH_SIZE)?)
            }
            MessageType::DataLayout => {
                layout = Some(LayoutMessage::decode(&msg.data, OFFSET_SIZE, LENGTH_SIZE).within(Component::Layout)?)
            }
            MessageType::ModificationTime => mtime = modification_time::decode(&msg.data),
            MessageType::ModificationTimeOld => mtime_old = modification_time::decode_old(&msg.data),
            _ => {}
        }
    }
    let space = space.ok_or_else(|| err!(Corrupt, "dataset header has no dataspace message"))?;
    let dtype = dtype.ok_or_else(|| err!(Corrupt, "dataset header has no datatype message"))?;
    let layout = layout.ok_or_else(|| err!(Corrupt, "dataset header has no layout message"))?;
    if let Err(msg) = dtype.validate() {
        bail!(Corrupt, "stored datatype is invalid: {msg}");
    }
    let fill_msg = fill_msg.unwrap_or_else(|| FillValueMessage {
        alloc_time: implied_alloc_time(&layout.layout),
        fill_time: FillTime::IfSet,
        status: FillStatus::Default,
        value: None,
    });
    Ok(DatasetMessages {
        space,
        dtype,
        fill: FillValue::from_message(fill_msg, legacy_fill),
        pipeline,
        efl,
        layout,
        mtime: mtime.or(mtime_old),
    })
}
