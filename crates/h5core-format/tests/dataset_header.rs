//! Assemble a complete dataset object header from individual messages and
//! read every message back through the chunked header decoder.

use h5core_format::data_layout::{ChunkIndex, DataLayout, LayoutMessage};
use h5core_format::dataspace::{Dataspace, UNLIMITED};
use h5core_format::datatype::{Datatype, Endian};
use h5core_format::fill_value::{AllocTime, FillStatus, FillTime, FillValueMessage};
use h5core_format::filter_pipeline::{FilterDescription, FilterPipelineMessage, FILTER_DEFLATE};
use h5core_format::message_type::MessageType;
use h5core_format::object_header::{
    decode_chunk, initial_capacity, HeaderPrefix, HeaderWriter, RawMessage, PREFIX_LEN,
};

fn messages(floor: u8, layout_version: u8) -> Vec<RawMessage> {
    let space = Dataspace::with_max(&[100, 8], &[UNLIMITED, 8]);
    let dtype = Datatype::float32(Endian::Little);
    let fill = FillValueMessage {
        alloc_time: AllocTime::Incremental,
        fill_time: FillTime::IfSet,
        status: FillStatus::UserDefined,
        value: Some((-1.0f32).to_le_bytes().to_vec()),
    };
    let pipeline = FilterPipelineMessage {
        filters: vec![FilterDescription {
            id: FILTER_DEFLATE,
            name: None,
            flags: 0,
            client_data: vec![4],
        }],
    };
    let layout = LayoutMessage {
        version: layout_version,
        layout: DataLayout::Chunked {
            dims: vec![10, 8],
            element_size: 4,
            flags: 0,
            index: ChunkIndex::BTreeV1 { addr: None },
        },
    };
    let v = if floor >= 3 { 2 } else { 1 };
    vec![
        RawMessage::new(MessageType::Dataspace, space.encode(v, 8)),
        RawMessage::new(MessageType::Datatype, dtype.encode(floor)).with_flags(0x01),
        RawMessage::new(MessageType::FillValue, fill.encode(if floor >= 3 { 3 } else { 2 }))
            .with_flags(0x01),
        RawMessage::new(MessageType::FilterPipeline, pipeline.encode(v)),
        RawMessage::new(MessageType::DataLayout, layout.encode(8, 8).unwrap()),
    ]
}

fn decode_all(chunk0: &[u8]) -> Vec<RawMessage> {
    let prefix = HeaderPrefix::decode(&chunk0[..PREFIX_LEN]).unwrap();
    let contents = decode_chunk(&prefix, chunk0, true, 8, 8).unwrap();
    assert!(contents.continuations.is_empty());
    contents.messages
}

#[test]
fn v2_header_roundtrip() {
    let msgs = messages(3, 3);
    let writer = HeaderWriter {
        version: 2,
        chunk0_capacity: initial_capacity(2, &msgs, false, 8, 8),
        offset_size: 8,
        length_size: 8,
    };
    let plan = writer.plan(&msgs).unwrap();
    let (chunk0, cont) = writer.encode(&msgs, &plan, None).unwrap();
    assert!(cont.is_none());

    let back = decode_all(&chunk0);
    assert_eq!(back.len(), 5);

    let space = Dataspace::decode(&back[0].data, 8).unwrap();
    assert_eq!(space.dims, vec![100, 8]);
    assert!(space.is_unlimited(0));

    let (dtype, _) = Datatype::decode(&back[1].data).unwrap();
    assert_eq!(dtype, Datatype::float32(Endian::Little));
    assert_eq!(back[1].flags, 0x01);

    let fill = FillValueMessage::decode(&back[2].data).unwrap();
    assert_eq!(fill.value.as_deref(), Some(&(-1.0f32).to_le_bytes()[..]));

    let pipeline = FilterPipelineMessage::decode(&back[3].data).unwrap();
    assert_eq!(pipeline.filters[0].client_data, vec![4]);

    let layout = LayoutMessage::decode(&back[4].data, 8, 8).unwrap();
    assert!(matches!(layout.layout, DataLayout::Chunked { .. }));
}

#[test]
fn v1_header_keeps_padded_messages_decodable() {
    let msgs = messages(1, 3);
    let writer = HeaderWriter {
        version: 1,
        chunk0_capacity: initial_capacity(1, &msgs, true, 8, 8),
        offset_size: 8,
        length_size: 8,
    };
    let (chunk0, _) = writer
        .encode(&msgs, &writer.plan(&msgs).unwrap(), None)
        .unwrap();
    let back = decode_all(&chunk0);
    for (orig, got) in msgs.iter().zip(&back) {
        assert_eq!(orig.msg_type, got.msg_type);
        assert_eq!(got.data.len() % 8, 0);
        assert_eq!(&got.data[..orig.data.len()], &orig.data[..]);
    }
    assert_eq!(
        Dataspace::decode(&back[0].data, 8).unwrap().dims,
        vec![100, 8]
    );
    assert_eq!(
        FillValueMessage::decode(&back[2].data).unwrap().status,
        FillStatus::UserDefined
    );
}
